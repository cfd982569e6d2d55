// XD diagnostic: READ-ONLY check of a controller connection
//
// Only queries are sent (SOFT, SRNO, STAT, EPOS, DPOS, SSPD, FREQ); nothing
// moves. Run this before driving a stage from the runtime.
//
// Usage: xd_diagnostic [port] [axes]
// Example: xd_diagnostic /dev/ttyACM0 3

use xeryon_xd::config::DEFAULT_BAUDRATE;
use xeryon_xd::xd::{Controller, PollPeriods, axis_prefix};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyACM0".to_string());
    let axes: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 1,
    };

    println!("XD diagnostic (read-only)");
    println!("Serial port: {} @ {} baud, {} axes", port, DEFAULT_BAUDRATE, axes);
    println!();

    println!("Step 1: Opening controller...");
    let periods = PollPeriods::default();
    let controller = match Controller::open("diag", &port, DEFAULT_BAUDRATE, axes, periods) {
        Ok(c) => c,
        Err(e) => {
            println!("  Failed to open controller: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected and the controller is powered");
            return Err(e.into());
        }
    };
    println!(
        "  Firmware: {}",
        controller.firmware_version().unwrap_or("NO RESPONSE")
    );
    println!(
        "  Serial:   {}",
        controller.serial_number().unwrap_or("NO RESPONSE")
    );
    println!();

    println!("Step 2: Polling axes...");
    for index in 0..controller.axis_count() {
        let label = axis_prefix(index, axes)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  === Axis {} ({}) ===", index, label);

        match controller.poll_axis(index) {
            Ok(moving) => println!("    Moving:           {}", moving),
            Err(e) => println!("    Poll:             ERROR - {}", e),
        }
        let axis = controller.axis_snapshot(index)?;
        let flags = axis.flags();
        println!("    Status word:      0x{:08X}", axis.status_word());
        println!("    Closed loop:      {}", flags.closed_loop);
        println!("    Encoder valid:    {}", flags.encoder_valid);
        println!("    Position reached: {}", flags.position_reached);
        println!("    Limits (L/R):     {} / {}", flags.at_left_end, flags.at_right_end);
        println!("    Errors (enc/lim): {} / {}", flags.encoder_error, flags.error_limit);
        println!("    Encoder position: {}", axis.encoder_position());
        println!("    Target position:  {}", axis.target_position());
        println!("    Velocity:         {}", axis.target_velocity());
        println!("    Frequency:        {}", axis.excitation_frequency());
        println!();
    }

    println!("Diagnostic complete");
    Ok(())
}
