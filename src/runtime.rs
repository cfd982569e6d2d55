// Host glue: controllers from config, one poll task and one command worker per
// controller, and a zenoh bridge for readbacks and motion requests.
//
// Controller calls block on the serial line, so every one of them runs on the
// blocking pool. Requests for a controller go through its own queue and run in
// the order they were received. A failed poll, publish or command is logged and
// the next cycle proceeds independently.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use crate::config::{CMD_LOOP_HZ, COMMAND_QUEUE_DEPTH, ControllerConfig, RuntimeConfig, TOPIC_CMD};
use crate::messages::{AxisAction, AxisReadback, AxisRequest, readback_topic};
use crate::xd::{Controller, registry};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Create and configure one controller through the registry
///
/// Axis configuration failures are logged; the controller stays registered.
pub fn create_controller(config: &ControllerConfig) -> crate::xd::Result<Arc<Controller>> {
    let controller = registry().add_controller(
        &config.name,
        &config.port,
        config.baud_rate,
        config.axes,
        config.poll_periods(),
    )?;

    for axis in &config.axis_stages {
        if let Err(e) = controller.configure_axis(axis.index, &axis.stage) {
            warn!(
                "{}: configuring axis {} as {} failed: {}",
                config.name, axis.index, axis.stage, e
            );
        }
    }
    Ok(controller)
}

/// Execute one host request on a controller
pub fn apply(controller: &Controller, request: &AxisRequest) -> crate::xd::Result<()> {
    let axis = request.axis;
    match &request.action {
        AxisAction::Move {
            position,
            relative,
            min_velocity,
            max_velocity,
            acceleration,
        } => controller.move_axis(
            axis,
            *position,
            *relative,
            *min_velocity,
            *max_velocity,
            *acceleration,
        ),
        AxisAction::Home {
            min_velocity,
            max_velocity,
            acceleration,
            forwards,
        } => controller.home_axis(axis, *min_velocity, *max_velocity, *acceleration, *forwards),
        AxisAction::Stop { acceleration } => controller.stop_axis(axis, *acceleration),
        AxisAction::SetStage { stage } => controller.configure_axis(axis, stage),
    }
}

/// Execute one host request against the registry
pub fn dispatch(request: &AxisRequest) -> crate::xd::Result<()> {
    let controller = registry().get_controller(&request.controller)?;
    apply(&controller, request)
}

/// Start the command worker of one controller
///
/// Requests sent on the returned queue run one at a time, in the order they
/// were sent. The worker exits once every sender is dropped.
pub fn spawn_command_worker(
    controller: Arc<Controller>,
) -> (mpsc::Sender<AxisRequest>, JoinHandle<()>) {
    let (queue, mut requests) = mpsc::channel::<AxisRequest>(COMMAND_QUEUE_DEPTH);
    let worker = tokio::task::spawn_blocking(move || {
        while let Some(request) = requests.blocking_recv() {
            if let Err(e) = apply(&controller, &request) {
                warn!(
                    "Request {:?} on {}/{} failed: {}",
                    request.action, request.controller, request.axis, e
                );
            }
        }
        debug!("Command worker for '{}' stopped", controller.name());
    });
    (queue, worker)
}

/// Poll every axis once and build the host-facing readbacks
pub fn poll_cycle(controller: &Controller) -> (Vec<AxisReadback>, bool) {
    let axes = controller.poll_all();
    let any_moving = axes.iter().any(|a| a.flags().is_moving());
    let readbacks = axes
        .iter()
        .map(|a| AxisReadback::from_axis(controller.name(), a))
        .collect();
    (readbacks, any_moving)
}

/// Poll forever, handing each axis readback as JSON to `publish`
///
/// Neither a panicked poll nor a failed publish ends the loop.
pub async fn poll_forever<F, Fut, E>(controller: Arc<Controller>, mut publish: F)
where
    F: FnMut(usize, String) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    loop {
        let worker = Arc::clone(&controller);
        let cycle = tokio::task::spawn_blocking(move || poll_cycle(&worker)).await;
        let (readbacks, any_moving) = match cycle {
            Ok(cycle) => cycle,
            Err(e) => {
                warn!("{}: poll cycle aborted: {}", controller.name(), e);
                (Vec::new(), false)
            }
        };

        for readback in &readbacks {
            let json = match serde_json::to_string(readback) {
                Ok(json) => json,
                Err(e) => {
                    warn!("{}: cannot encode readback: {}", controller.name(), e);
                    continue;
                }
            };
            if let Err(e) = publish(readback.axis, json).await {
                warn!(
                    "{}: publishing axis {} readback failed: {}",
                    controller.name(),
                    readback.axis,
                    e
                );
            }
        }

        sleep(controller.next_poll_period(any_moving)).await;
    }
}

async fn poll_loop(session: zenoh::Session, controller: Arc<Controller>) -> Result<(), BoxError> {
    let mut publishers = Vec::with_capacity(controller.axis_count());
    for axis in 0..controller.axis_count() {
        let topic = readback_topic(controller.name(), axis);
        publishers.push(session.declare_publisher(topic).await?);
    }
    info!(
        "Polling '{}' ({} axes, {:?} moving / {:?} idle)",
        controller.name(),
        controller.axis_count(),
        controller.poll_periods().moving,
        controller.poll_periods().idle
    );

    let publishers = Arc::new(publishers);
    poll_forever(controller, move |axis, json| {
        let publishers = Arc::clone(&publishers);
        async move {
            match publishers.get(axis) {
                Some(publisher) => publisher.put(json).await,
                None => Err(format!("no publisher for axis {}", axis).into()),
            }
        }
    })
    .await;
    Ok(())
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    let mut controllers = Vec::new();
    for entry in config.controllers {
        let result = tokio::task::spawn_blocking(move || create_controller(&entry)).await?;
        match result {
            Ok(controller) => controllers.push(controller),
            // A bad port only loses that controller
            Err(e) => error!("Controller creation failed: {}", e),
        }
    }
    if controllers.is_empty() {
        return Err("no controller could be created".into());
    }

    let mut queues = HashMap::new();
    for controller in controllers {
        let name = controller.name().to_string();
        let (queue, _worker) = spawn_command_worker(Arc::clone(&controller));
        queues.insert(name.clone(), queue);

        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = poll_loop(session, controller).await {
                error!("Poll task for '{}' stopped: {}", name, e);
            }
        });
    }

    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    info!("Subscribed to: {}", TOPIC_CMD);
    let mut tick = interval(Duration::from_millis(1000 / CMD_LOOP_HZ));

    loop {
        tick.tick().await;

        // Drain pending requests into their controller's queue
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            let request = match serde_json::from_slice::<AxisRequest>(&payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    continue;
                }
            };
            info!("Received request: {:?}", &request);
            match queues.get(&request.controller) {
                Some(queue) => {
                    if let Err(e) = queue.send(request).await {
                        warn!("Command queue for '{}' is closed", e.0.controller);
                    }
                }
                None => warn!("Request for unknown controller '{}'", request.controller),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xd::mock_serial::MockSerial;
    use crate::xd::{ErrorKind, LineTransport, PollPeriods, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn register_mock(name: &str, axes: usize) -> MockSerial {
        let mock = MockSerial::new();
        let port = mock.clone();
        registry()
            .add_controller_with_transport(name, axes, PollPeriods::default(), move || {
                Ok(Box::new(LineTransport::new(port)) as Box<dyn Transport>)
            })
            .unwrap();
        mock
    }

    #[test]
    fn test_dispatch_unknown_controller() {
        let req = AxisRequest {
            controller: "runtime-missing".to_string(),
            axis: 0,
            action: AxisAction::Stop { acceleration: 0.0 },
        };
        assert_eq!(dispatch(&req).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_dispatch_reaches_device() {
        let mock = register_mock("runtime-dispatch", 1);
        mock.clear_written();
        let req = AxisRequest {
            controller: "runtime-dispatch".to_string(),
            axis: 0,
            action: AxisAction::Home {
                min_velocity: 0.0,
                max_velocity: 1.0,
                acceleration: 0.0,
                forwards: true,
            },
        };
        dispatch(&req).unwrap();
        assert_eq!(mock.written_lines(), vec!["INDX=1"]);
    }

    #[tokio::test]
    async fn test_command_worker_keeps_submission_order() {
        let mock = register_mock("runtime-order", 1);
        let controller = registry().get_controller("runtime-order").unwrap();
        mock.clear_written();

        let (queue, worker) = spawn_command_worker(controller);
        let request = |action| AxisRequest {
            controller: "runtime-order".to_string(),
            axis: 0,
            action,
        };
        for _ in 0..10 {
            queue
                .send(request(AxisAction::Move {
                    position: 1500.0,
                    relative: false,
                    min_velocity: 0.0,
                    max_velocity: 10.0,
                    acceleration: 0.0,
                }))
                .await
                .unwrap();
            queue
                .send(request(AxisAction::Stop { acceleration: 0.0 }))
                .await
                .unwrap();
        }
        drop(queue);
        worker.await.unwrap();

        let lines = mock.written_lines();
        assert_eq!(lines.len(), 30);
        for chunk in lines.chunks(3) {
            assert_eq!(chunk, ["SSPD=10", "DPOS=1500", "ZERO=0"]);
        }
        assert_eq!(lines.last().map(String::as_str), Some("ZERO=0"));
    }

    #[tokio::test]
    async fn test_command_worker_survives_failed_request() {
        let mock = register_mock("runtime-worker-err", 1);
        let controller = registry().get_controller("runtime-worker-err").unwrap();
        mock.clear_written();

        let (queue, worker) = spawn_command_worker(controller);
        for axis in [5, 0] {
            queue
                .send(AxisRequest {
                    controller: "runtime-worker-err".to_string(),
                    axis,
                    action: AxisAction::Stop { acceleration: 0.0 },
                })
                .await
                .unwrap();
        }
        drop(queue);
        worker.await.unwrap();
        assert_eq!(mock.written_lines(), vec!["ZERO=0"]);
    }

    #[tokio::test]
    async fn test_poll_loop_survives_publish_failures() {
        let mock = MockSerial::new();
        let port = mock.clone();
        let periods = PollPeriods {
            moving: Duration::from_millis(5),
            idle: Duration::from_millis(5),
        };
        let controller = registry()
            .add_controller_with_transport("runtime-publish", 1, periods, move || {
                Ok(Box::new(LineTransport::new(port)) as Box<dyn Transport>)
            })
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let publish = move |_axis: usize, _json: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err("session closed")
                } else {
                    Ok(())
                }
            }
        };
        let limit = Duration::from_millis(300);
        let outcome = tokio::time::timeout(limit, poll_forever(controller, publish)).await;

        assert!(outcome.is_err(), "poll loop must not return");
        assert!(attempts.load(Ordering::SeqCst) > 3);
    }

    #[test]
    fn test_poll_cycle_marks_problem_and_recovers() {
        let mock = register_mock("runtime-poll", 2);
        let controller = registry().get_controller("runtime-poll").unwrap();
        mock.set_register("X:STAT", &(1u32 << 10).to_string());
        mock.fail_reads_for("Y:STAT");

        let (readbacks, any_moving) = poll_cycle(&controller);
        assert_eq!(readbacks.len(), 2);
        assert!(readbacks[0].done && !readbacks[0].problem);
        assert!(readbacks[1].problem);
        assert!(any_moving);

        mock.heal("Y:STAT");
        mock.set_register("Y:STAT", &(1u32 << 10).to_string());
        let (readbacks, any_moving) = poll_cycle(&controller);
        assert!(!readbacks[1].problem);
        assert!(!any_moving);
    }
}
