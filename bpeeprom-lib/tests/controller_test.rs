use bpeeprom_lib::sim::{Fault, ModeStep, SimulatedBus};
use bpeeprom_lib::{
    ControllerState, DeviceAddress, Error, JobEvent, JobKind, JobStatus, OperationController,
    PageLayout, SessionConfig, TransferJob,
};
use std::sync::Arc;
use std::time::Duration;

fn controller(bus: &SimulatedBus) -> OperationController {
    OperationController::new(Arc::new(bus.clone())).with_settle_time(Duration::ZERO)
}

fn config() -> SessionConfig {
    SessionConfig::new("/dev/ttySIM0")
}

/// Deterministic xorshift so the failing chunk varies without a rand dependency.
fn next(seed: &mut u32) -> u32 {
    *seed ^= *seed << 13;
    *seed ^= *seed >> 17;
    *seed ^= *seed << 5;
    *seed
}

#[test]
fn reset_runs_once_before_terminal_event_for_failing_jobs() {
    let mut seed = 0x1234_5678u32;
    for _ in 0..100 {
        let chunks = 16usize;
        let fail_at = next(&mut seed) as usize % chunks;
        let bus = SimulatedBus::new(64, 4).fail_on_write(fail_at);
        let job = TransferJob::write(DeviceAddress::DEFAULT, 4, vec![0x42; chunks * 4]).unwrap();

        let handle = controller(&bus).start(job, config()).unwrap();
        let mut resets_at_terminal = None;
        let result = handle.wait_with(|event| {
            if let JobEvent::Complete(_) = event {
                resets_at_terminal = Some(bus.reset_count());
            }
        });

        assert_eq!(result.outcome.status, JobStatus::Failed);
        assert!(result.outcome.message.contains(&format!("chunk {}", fail_at)));
        assert_eq!(resets_at_terminal, Some(1));
        assert_eq!(bus.reset_count(), 1);
        assert_eq!(bus.data_writes(), fail_at + 1);
        assert!(bus.in_terminal_mode());
    }
}

#[test]
fn events_are_ordered_and_progress_monotonic() {
    let bus = SimulatedBus::new(256, 8);
    let job = TransferJob::write(DeviceAddress::DEFAULT, 8, (0..100).collect()).unwrap();
    let handle = controller(&bus).start(job, config()).unwrap();

    let mut events = Vec::new();
    let result = handle.wait_with(|e| events.push(e.clone()));
    assert!(result.outcome.success());

    let terminal = events
        .iter()
        .position(|e| matches!(e, JobEvent::Complete(_)))
        .unwrap();
    assert_eq!(terminal, events.len() - 1);

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));

    let logs: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Log(s) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    assert!(logs[0].starts_with("Connecting to Bus Pirate"));
    assert!(logs.contains(&"Bus Pirate reset to normal mode"));
    assert_eq!(&bus.memory()[..100], &(0..100).collect::<Vec<u8>>()[..]);
}

#[test]
fn read_delivers_image_before_completion() {
    let bus = SimulatedBus::new(128, 8);
    let image: Vec<u8> = (0..128).map(|i| (i * 3) as u8).collect();
    bus.load_memory(&image);

    let job = TransferJob::read(DeviceAddress::DEFAULT, PageLayout::new(8, 128).unwrap());
    let handle = controller(&bus).start(job, config()).unwrap();
    let mut order = Vec::new();
    let result = handle.wait_with(|e| match e {
        JobEvent::DataReady(_) => order.push("data"),
        JobEvent::Complete(_) => order.push("complete"),
        _ => {}
    });

    assert!(result.outcome.success());
    assert_eq!(result.outcome.message, "Read completed successfully!");
    assert_eq!(result.data, Some(image));
    assert_eq!(order, vec!["data", "complete"]);
    assert_eq!(bus.reset_count(), 1);
}

#[test]
fn erase_then_verify_leaves_ff() {
    let bus = SimulatedBus::new(256, 4);
    bus.load_memory(&[0u8; 256]);
    let job =
        TransferJob::erase(DeviceAddress::DEFAULT, PageLayout::new(4, 256).unwrap()).with_verify(true);
    let result = controller(&bus).start(job, config()).unwrap().wait();
    assert!(result.outcome.success(), "{}", result.outcome.message);
    assert!(bus.memory().iter().all(|&b| b == 0xFF));
    assert_eq!(bus.data_writes(), 64);
}

#[test]
fn verify_catches_wrong_device_size() {
    // 128-byte device behind a 256-byte image: the upper half aliases the lower.
    let bus = SimulatedBus::new(128, 8);
    let payload: Vec<u8> = (0..=255).collect();
    let job = TransferJob::write(DeviceAddress::DEFAULT, 8, payload)
        .unwrap()
        .with_verify(true);
    let result = controller(&bus).start(job, config()).unwrap().wait();
    assert_eq!(result.outcome.status, JobStatus::Failed);
    assert!(result.outcome.message.contains("verify failed"));
    assert_eq!(bus.reset_count(), 1);
}

#[test]
fn wrong_address_fails_first_chunk() {
    let bus = SimulatedBus::new(64, 4).with_address(DeviceAddress::new(0xA4));
    let job = TransferJob::write(DeviceAddress::DEFAULT, 4, vec![1; 16]).unwrap();
    let result = controller(&bus).start(job, config()).unwrap().wait();
    assert_eq!(result.outcome.status, JobStatus::Failed);
    assert!(result.outcome.message.contains("chunk 0"));
    assert_eq!(bus.reset_count(), 1);
}

#[test]
fn cancel_stops_at_chunk_boundary() {
    let bus = SimulatedBus::new(256, 4).with_write_latency(Duration::from_millis(5));
    let ctrl = controller(&bus);
    let job = TransferJob::write(DeviceAddress::DEFAULT, 4, vec![0x11; 256]).unwrap();
    let handle = ctrl.start(job, config()).unwrap();

    let token = handle.cancel_token();
    let result = handle.wait_with(|e| {
        if let JobEvent::Progress(_) = e {
            token.cancel();
        }
    });

    assert_eq!(result.outcome.status, JobStatus::Cancelled);
    assert!(!result.outcome.success());
    assert!(bus.data_writes() >= 1);
    assert!(bus.data_writes() < 64);
    assert_eq!(bus.reset_count(), 1);
    assert_eq!(ctrl.last_status(), Some(JobStatus::Cancelled));
}

#[test]
fn second_start_is_rejected_while_running() {
    let bus = SimulatedBus::new(256, 4).with_write_latency(Duration::from_millis(2));
    let ctrl = controller(&bus);
    let job = TransferJob::write(DeviceAddress::DEFAULT, 4, vec![0x22; 256]).unwrap();
    let handle = ctrl.start(job.clone(), config()).unwrap();
    assert_eq!(ctrl.state(), ControllerState::Running(JobKind::Write));

    let err = ctrl.start(job.clone(), config()).err().unwrap();
    assert!(matches!(err, Error::Busy(JobKind::Write)));

    assert!(ctrl.cancel());
    let result = handle.wait();
    assert_eq!(result.outcome.status, JobStatus::Cancelled);
    assert_eq!(ctrl.state(), ControllerState::Idle);
    assert!(!ctrl.cancel());

    let again = ctrl.start(job, config()).unwrap().wait();
    assert!(again.outcome.success());
    assert_eq!(bus.reset_count(), 2);
}

#[test]
fn terminal_event_implies_idle_controller() {
    let bus = SimulatedBus::new(32, 4);
    let ctrl = controller(&bus);
    let job = TransferJob::erase(DeviceAddress::DEFAULT, PageLayout::new(4, 32).unwrap());
    let handle = ctrl.start(job, config()).unwrap();
    let mut state_at_terminal = None;
    handle.wait_with(|e| {
        if let JobEvent::Complete(_) = e {
            state_at_terminal = Some(ctrl.state());
        }
    });
    assert_eq!(state_at_terminal, Some(ControllerState::Idle));
}

/// Drains the raw event stream until the worker drops its sender, noting
/// the adapter reset count at the terminal event.
fn drain_events(bus: &SimulatedBus, job: TransferJob) -> (Vec<JobEvent>, Option<usize>) {
    let mut handle = controller(bus).start(job, config()).unwrap();
    let mut events = Vec::new();
    let mut resets_at_terminal = None;
    for event in handle.events().iter() {
        if let JobEvent::Complete(_) = event {
            resets_at_terminal = Some(bus.reset_count());
        }
        events.push(event);
    }
    handle.join();
    (events, resets_at_terminal)
}

fn terminal(events: &[JobEvent]) -> &bpeeprom_lib::JobOutcome {
    let completes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Complete(outcome) => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(completes.len(), 1, "events: {:?}", events);
    assert!(matches!(events.last(), Some(JobEvent::Complete(_))));
    completes[0]
}

fn small_write() -> TransferJob {
    TransferJob::write(DeviceAddress::DEFAULT, 4, vec![0x5A; 32]).unwrap()
}

#[test]
fn failed_mode_switch_resets_once_before_failure() {
    for step in [
        ModeStep::Bitbang,
        ModeStep::I2c,
        ModeStep::Configure,
        ModeStep::Speed,
    ] {
        let bus = SimulatedBus::new(64, 4).fail_mode_entry(step, Fault::Error);
        let (events, resets) = drain_events(&bus, small_write());

        let outcome = terminal(&events);
        assert_eq!(outcome.status, JobStatus::Failed, "{:?}", step);
        assert!(outcome.message.contains("connection error"), "{}", outcome.message);
        assert_eq!(resets, Some(1), "{:?}", step);
        assert_eq!(bus.reset_count(), 1);
        assert_eq!(bus.data_writes(), 0);
        assert!(bus.in_terminal_mode());
    }
}

#[test]
fn panic_during_mode_entry_still_completes() {
    let bus = SimulatedBus::new(64, 4).fail_mode_entry(ModeStep::I2c, Fault::Panic);
    let (events, resets) = drain_events(&bus, small_write());

    let outcome = terminal(&events);
    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.message.contains("unexpected fault"), "{}", outcome.message);
    assert_eq!(resets, Some(1));
    assert_eq!(bus.reset_count(), 1);
}

#[test]
fn engine_panic_fails_job_after_single_reset() {
    let bus = SimulatedBus::new(64, 4).panic_on_write(2);
    let ctrl = controller(&bus);
    let handle = ctrl.start(small_write(), config()).unwrap();
    let mut events = Vec::new();
    let mut resets_at_terminal = None;
    let result = handle.wait_with(|e| {
        if let JobEvent::Complete(_) = e {
            resets_at_terminal = Some(bus.reset_count());
        }
        events.push(e.clone());
    });

    assert_eq!(result.outcome.status, JobStatus::Failed);
    assert!(result.outcome.message.contains("adapter fault on data write 2"));
    assert_eq!(resets_at_terminal, Some(1));
    assert!(events.contains(&JobEvent::Log("Bus Pirate reset to normal mode".into())));
    assert_eq!(ctrl.state(), ControllerState::Idle);
    assert_eq!(ctrl.last_status(), Some(JobStatus::Failed));
}

#[test]
fn panic_during_reset_still_completes() {
    let bus = SimulatedBus::new(64, 4).panic_on_reset();
    let (events, resets) = drain_events(&bus, small_write());

    let outcome = terminal(&events);
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(resets, Some(1));
    assert_eq!(bus.reset_count(), 1);
    assert_eq!(bus.data_writes(), 8);
}
