mod support;

use std::time::Duration;

use embassy_futures::block_on;
use meter_core::config::{AgentConfig, DEFAULT_SLAVES};
use meter_core::cycle::{CycleScheduler, Outcome};
use meter_core::failure::{FailureState, FailureTracker, Thresholds};
use meter_core::meter::{Channel, SlaveId};
use meter_core::upload::{ReportKind, ReportUploader, StatusCode, TransportError, UploadOutcome};

use support::{
    MeterBehavior, MockBus, MockCollector, MockLink, RecordingDelay, RecordingObserver, Seen,
};

fn config(slaves: &[u8]) -> AgentConfig<'static> {
    let slaves: Vec<SlaveId> = slaves.iter().copied().map(SlaveId::new).collect();
    AgentConfig::new().with_slaves(&slaves).unwrap()
}

#[test]
fn single_healthy_meter_uploads_and_clears_bus_errors() {
    let bus = MockBus::default().with(
        0x01,
        MeterBehavior::Healthy {
            voltage: 230.5,
            current: 1.2,
        },
    );
    let mut scheduler = CycleScheduler::new(
        &config(&[0x01]),
        bus,
        MockLink::up(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(5, 0, 0));
    let mut observer = RecordingObserver::default();

    let outcome = block_on(scheduler.run_cycle(&mut observer));

    let Outcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.counters.bus_errors(), 0);
    assert_eq!(scheduler.uploader().transport().data_requests(), 1);
    assert_eq!(
        observer.reports(ReportKind::Data),
        vec![UploadOutcome::Delivered(StatusCode::OK)]
    );
    assert_eq!(scheduler.driver().reads_for(0x01), Channel::ALL.to_vec());
}

#[test]
fn meters_without_current_count_as_bus_failure() {
    let mut bus = MockBus::default();
    for slave in DEFAULT_SLAVES {
        bus = bus.with(slave.address(), MeterBehavior::NoCurrent);
    }
    let mut scheduler = CycleScheduler::new(
        &AgentConfig::new(),
        bus,
        MockLink::up(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(2, 0, 0));
    let mut observer = RecordingObserver::default();

    let outcome = block_on(scheduler.run_cycle(&mut observer));

    let Outcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(summary.polled, 4);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.counters.bus_errors(), 3);
    assert_eq!(summary.counters.network_errors(), 0, "no upload attempted");
    assert!(scheduler.uploader().transport().targets.is_empty());
    for slave in DEFAULT_SLAVES {
        assert_eq!(
            scheduler.driver().reads_for(slave.address()),
            vec![Channel::Voltage, Channel::Current]
        );
    }
}

#[test]
fn bus_breach_with_link_down_still_restarts() {
    let mut scheduler = CycleScheduler::new(
        &config(&[0x01, 0x65]),
        MockBus::default(),
        MockLink::down(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(30, 0, 0));
    let mut observer = RecordingObserver::default();

    let outcome = block_on(scheduler.run_cycle(&mut observer));

    let Outcome::Restart(notice) = outcome else {
        panic!("expected a restart, got {outcome:?}");
    };
    assert!(notice.breach.bus);
    assert!(!notice.breach.network && !notice.breach.upload);
    assert_eq!(notice.counters.bus_errors(), 31);
    assert_eq!(notice.report, UploadOutcome::LinkUnavailable);
    assert_eq!(
        observer.reports(ReportKind::Error),
        vec![UploadOutcome::LinkUnavailable]
    );
    assert!(scheduler.uploader().transport().targets.is_empty());
}

#[test]
fn error_report_invocation_pushes_upload_count_over_threshold() {
    let tracker = FailureTracker::new(Thresholds::new(30, 10, 5));
    let mut state = FailureState::from_counts(0, 0, 4);
    let mut uploader = ReportUploader::new(
        MockLink::up(),
        MockCollector::answering(500),
        "/v1/gdb/payload/",
        "/v1/gdb/errors/",
    );

    // A rejected data upload leaves the upload counter alone.
    let reading = meter_core::meter::MeterReading {
        slave: SlaveId::new(1),
        voltage: 230.0,
        current: 1.0,
        active_power: 230.0,
        frequency: 50.0,
        total_active_energy: 1.0,
        import_active_energy: 1.0,
        export_active_energy: 0.0,
        power_factor: 1.0,
    };
    let data = block_on(uploader.upload_reading(&reading, 10, &mut state));
    assert_eq!(data, UploadOutcome::Rejected(StatusCode::new(500)));
    assert_eq!(state.upload_errors(), 4);
    assert_eq!(tracker.check(&state), None);

    let event = meter_core::escalation::ErrorEvent::new("Rebooting...", state, Some(-70));
    block_on(uploader.report_error(&event, &mut state));

    assert_eq!(state.upload_errors(), 5);
    let breach = tracker.check(&state).expect("upload threshold crossed");
    assert!(breach.upload);
}

#[test]
fn network_counter_resets_on_any_attempt_with_link_up() {
    let collector = MockCollector::failing_with(Ok(meter_core::upload::Response {
        status: StatusCode::new(404),
    }))
    .then(Err(TransportError::Connect))
    .then(Err(TransportError::Timeout));
    let bus = MockBus::default().with(
        0x01,
        MeterBehavior::Healthy {
            voltage: 229.0,
            current: 2.0,
        },
    );
    let mut scheduler = CycleScheduler::new(
        &config(&[0x01]),
        bus,
        MockLink::up(),
        collector,
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(0, 6, 0));
    let mut observer = RecordingObserver::default();

    block_on(scheduler.run_cycle(&mut observer));
    assert_eq!(
        scheduler.state().network_errors(),
        0,
        "a refused connection still completes the attempt"
    );
    block_on(scheduler.run_cycle(&mut observer));
    assert_eq!(scheduler.state().network_errors(), 0);
    block_on(scheduler.run_cycle(&mut observer));
    assert_eq!(scheduler.state().network_errors(), 0);

    scheduler.uploader_mut().link_mut().connected = false;
    block_on(scheduler.run_cycle(&mut observer));
    assert_eq!(scheduler.state().network_errors(), 1);
}

#[test]
fn unreachable_collector_with_link_up_never_restarts() {
    let mut bus = MockBus::default();
    for slave in DEFAULT_SLAVES {
        bus = bus.with(
            slave.address(),
            MeterBehavior::Healthy {
                voltage: 231.0,
                current: 0.8,
            },
        );
    }
    let mut scheduler = CycleScheduler::new(
        &AgentConfig::new(),
        bus,
        MockLink::up(),
        MockCollector::failing_with(Err(TransportError::Connect)),
        RecordingDelay::default(),
    );
    let mut observer = RecordingObserver::default();

    // Twelve cycles of four slaves is well past the network threshold.
    for _ in 0..12 {
        let outcome = block_on(scheduler.run_cycle(&mut observer));
        let Outcome::Completed(summary) = outcome else {
            panic!("expected a completed cycle, got {outcome:?}");
        };
        assert_eq!(summary.success_count, DEFAULT_SLAVES.len());
        assert_eq!(summary.counters.network_errors(), 0);
    }
    assert_eq!(scheduler.state().upload_errors(), 0);
    assert_eq!(scheduler.uploader().transport().error_requests(), 0);
    assert_eq!(scheduler.uploader().transport().data_requests(), 48);
}

#[test]
fn network_breach_after_consecutive_link_outages() {
    let bus = MockBus::default().with(
        0x01,
        MeterBehavior::Healthy {
            voltage: 230.0,
            current: 0.4,
        },
    );
    let config = config(&[0x01]).with_thresholds(Thresholds::new(30, 3, 6));
    let mut scheduler = CycleScheduler::new(
        &config,
        bus,
        MockLink::down(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    );
    let mut observer = RecordingObserver::default();

    assert!(matches!(
        block_on(scheduler.run_cycle(&mut observer)),
        Outcome::Completed(_)
    ));
    assert!(matches!(
        block_on(scheduler.run_cycle(&mut observer)),
        Outcome::Completed(_)
    ));
    let Outcome::Restart(notice) = block_on(scheduler.run_cycle(&mut observer)) else {
        panic!("third outage should cross the network threshold");
    };
    assert!(notice.breach.network);
    assert_eq!(notice.counters.network_errors(), 3);
    assert_eq!(scheduler.state().upload_errors(), 1);
}

#[test]
fn pacing_between_reads_and_slaves() {
    let bus = MockBus::default()
        .with(
            0x01,
            MeterBehavior::Healthy {
                voltage: 230.0,
                current: 1.0,
            },
        )
        .with(0x65, MeterBehavior::Offline);
    let mut scheduler = CycleScheduler::new(
        &config(&[0x01, 0x65]),
        bus,
        MockLink::up(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    );
    let mut observer = RecordingObserver::default();

    block_on(scheduler.run_cycle(&mut observer));

    let channel = Duration::from_millis(50);
    let slave = Duration::from_millis(200);
    let mut expected = vec![channel; 8];
    expected.push(slave);
    expected.push(channel);
    expected.push(slave);
    assert_eq!(scheduler.delay_mut().pauses, expected);
}

#[test]
fn observer_sees_events_in_cycle_order() {
    let bus = MockBus::default().with(
        0x01,
        MeterBehavior::Healthy {
            voltage: 230.0,
            current: 1.0,
        },
    );
    let mut scheduler = CycleScheduler::new(
        &config(&[0x01, 0x02]).with_cycle_ticks(2),
        bus,
        MockLink::up(),
        MockCollector::answering(301),
        RecordingDelay::default(),
    );
    let mut observer = RecordingObserver::default();

    assert_eq!(block_on(scheduler.tick(&mut observer)), Outcome::Idle);
    let Outcome::Completed(summary) = block_on(scheduler.tick(&mut observer)) else {
        panic!("second tick activates");
    };

    assert_eq!(observer.ticks, vec![1, 2]);
    assert_eq!(
        observer.seen,
        vec![
            Seen::CycleStart(2),
            Seen::Polled(SlaveId::new(0x01), true),
            Seen::Report(
                ReportKind::Data,
                UploadOutcome::Delivered(StatusCode::MOVED_PERMANENTLY)
            ),
            Seen::Polled(SlaveId::new(0x02), false),
            Seen::CycleEnd(summary),
        ]
    );
    assert!(
        scheduler.uploader().transport().targets[0].ends_with("&c=2"),
        "cycle counter rides along with the data report"
    );
}
