mod support;

use embassy_futures::block_on;
use meter_core::config::AgentConfig;
use meter_core::cycle::{CycleScheduler, Outcome, TickCounter};
use meter_core::escalation::{Escalator, RestartNotice};
use meter_core::failure::{Breach, FailureState, Thresholds};
use meter_core::meter::SlaveId;
use meter_core::upload::{ReportUploader, StatusCode, TransportError, UploadOutcome};

use support::{MeterBehavior, MockBus, MockCollector, MockLink, RecordingDelay, RecordingObserver, Seen};

fn single_slave() -> AgentConfig<'static> {
    AgentConfig::new().with_slaves(&[SlaveId::new(0x01)]).unwrap()
}

#[test]
fn delivered_error_report_still_restarts() {
    let mut scheduler = CycleScheduler::new(
        &single_slave(),
        MockBus::default(),
        MockLink::up(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(30, 0, 0));
    let mut observer = RecordingObserver::default();

    let Outcome::Restart(notice) = block_on(scheduler.run_cycle(&mut observer)) else {
        panic!("bus threshold should escalate");
    };

    assert_eq!(notice.report, UploadOutcome::Delivered(StatusCode::OK));
    let collector = scheduler.uploader().transport();
    assert_eq!(collector.error_requests(), 1);
    assert_eq!(
        collector.targets[0],
        "/v1/gdb/errors/?deviceId=EM-0A1B2C3D&error=Rebooting...%20bus&rssi=-58\
         &wifiFailed=0&httpFailed=1&busFailed=31"
    );
    assert!(matches!(observer.seen.last(), Some(Seen::Escalated(_))));
}

#[test]
fn latched_restart_sends_nothing_more() {
    let mut scheduler = CycleScheduler::new(
        &single_slave().with_cycle_ticks(1),
        MockBus::default(),
        MockLink::up(),
        MockCollector::failing_with(Err(TransportError::Timeout)),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(30, 0, 0));
    let mut observer = RecordingObserver::default();

    let first = block_on(scheduler.tick(&mut observer));
    assert!(matches!(first, Outcome::Restart(_)));
    let requests = scheduler.uploader().transport().targets.len();
    let reads = scheduler.driver().reads.len();

    for _ in 0..5 {
        assert_eq!(block_on(scheduler.tick(&mut observer)), first);
    }
    assert_eq!(scheduler.uploader().transport().targets.len(), requests);
    assert_eq!(scheduler.driver().reads.len(), reads);
    assert_eq!(requests, 1, "exactly one error-report attempt");
}

#[test]
fn check_runs_once_after_bus_update() {
    // Bus sits exactly at the threshold: a healthy cycle clears it before the check.
    let bus = MockBus::default().with(
        0x01,
        MeterBehavior::Healthy {
            voltage: 231.0,
            current: 0.7,
        },
    );
    let mut scheduler = CycleScheduler::new(
        &single_slave(),
        bus,
        MockLink::up(),
        MockCollector::answering(200),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(30, 0, 0));
    let mut observer = RecordingObserver::default();

    let outcome = block_on(scheduler.run_cycle(&mut observer));
    assert!(matches!(outcome, Outcome::Completed(summary) if summary.counters.bus_errors() == 0));
}

#[test]
fn upload_breach_restarts_on_next_check() {
    let config = single_slave().with_thresholds(Thresholds::new(30, 10, 2));
    let bus = MockBus::default().with(
        0x01,
        MeterBehavior::Healthy {
            voltage: 230.0,
            current: 1.0,
        },
    );
    let mut scheduler = CycleScheduler::new(
        &config,
        bus,
        MockLink::up(),
        MockCollector::answering(503),
        RecordingDelay::default(),
    )
    .with_state(FailureState::from_counts(0, 0, 2))
    .with_ticks(TickCounter::starting_at(40));
    let mut observer = RecordingObserver::default();

    let Outcome::Restart(notice) = block_on(scheduler.run_cycle(&mut observer)) else {
        panic!("upload counter already at threshold");
    };
    assert_eq!(
        notice.breach,
        Breach {
            bus: false,
            network: false,
            upload: true
        }
    );
    assert_eq!(notice.report, UploadOutcome::Rejected(StatusCode::new(503)));
    assert_eq!(scheduler.state().upload_errors(), 3);
    assert!(scheduler.uploader().transport().targets[0].ends_with("&c=40"));
}

#[test]
fn escalator_reports_snapshot_before_counting_the_report() {
    let mut uploader = ReportUploader::new(
        MockLink::down(),
        MockCollector::answering(200),
        "/p/",
        "/e/",
    );
    let mut state = FailureState::from_counts(1, 9, 5);
    let breach = Breach {
        bus: false,
        network: false,
        upload: true,
    };

    let notice: RestartNotice = block_on(Escalator::new().escalate(breach, &mut uploader, &mut state));

    assert_eq!(notice.counters, FailureState::from_counts(1, 9, 5));
    assert_eq!(notice.report, UploadOutcome::LinkUnavailable);
    assert_eq!(state, FailureState::from_counts(1, 10, 6));
}
