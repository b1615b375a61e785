use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use meter_core::config::AgentConfig;
use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    for profile in TranscriptProfile::ALL {
        record_profile(profile)?;
    }
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile, AgentConfig::new())?;
    match profile {
        TranscriptProfile::Healthy => record_healthy(&mut session)?,
        TranscriptProfile::BusFault => record_bus_fault(&mut session)?,
        TranscriptProfile::LinkOutage => record_link_outage(&mut session)?,
        TranscriptProfile::UploadFailure => record_upload_failure(&mut session)?,
    }

    let (bus, network, upload) = session.counters();
    println!(
        "{}: boots={} requests={} bus={bus} network={network} upload={upload} -> {}",
        profile.tag(),
        session.boots(),
        session.collector_targets().len(),
        profile.log_path()
    );
    Ok(())
}

fn record_healthy(session: &mut Session) -> io::Result<()> {
    session.handle_command("help")?;
    session.handle_command("status")?;
    session.handle_command("tick 10")?;
    session.handle_command("tick 20")?;
    session.handle_command("history 6")?;
    session.handle_command("status")?;
    Ok(())
}

fn record_bus_fault(session: &mut Session) -> io::Result<()> {
    session.handle_command("meter 0x66 no-current")?;
    session.handle_command("tick 10")?;
    session.handle_command("meter all offline")?;
    session.handle_command("tick 300")?;
    session.handle_command("status")?;
    session.handle_command("tick 10")?;
    session.handle_command("status")?;
    Ok(())
}

fn record_link_outage(session: &mut Session) -> io::Result<()> {
    session.handle_command("tick 10")?;
    session.handle_command("link down")?;
    session.handle_command("tick 20")?;
    session.handle_command("status")?;
    session.handle_command("link up")?;
    session.handle_command("tick 10")?;
    session.handle_command("status")?;
    session.handle_command("link down")?;
    session.handle_command("tick 30")?;
    session.handle_command("history 8")?;
    Ok(())
}

fn record_upload_failure(session: &mut Session) -> io::Result<()> {
    session.handle_command("collector 500")?;
    session.handle_command("tick 30")?;
    session.handle_command("status")?;
    session.handle_command("collector refuse")?;
    session.handle_command("tick 30")?;
    session.handle_command("status")?;
    session.handle_command("collector 301")?;
    session.handle_command("cycle")?;
    session.handle_command("status")?;
    Ok(())
}
