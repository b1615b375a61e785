mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use meter_core::config::AgentConfig;
use meter_core::failure::Thresholds;
use session::{Session, TranscriptProfile};

const USAGE: &str = "Usage: meter-emulator [--profile <healthy|bus-fault|link-outage|upload-failure>] \
     [--slaves <list>] [--cycle-ticks <n>] [--thresholds <bus,network,upload>]";

struct Options {
    profile: TranscriptProfile,
    config: AgentConfig<'static>,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.profile, options.config)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Meter Agent Emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            let (bus, network, upload) = session.counters();
            writeln!(
                writer,
                "Session closed after {} boot(s), {} collector requests, counters bus={bus} network={network} upload={upload}.",
                session.boots(),
                session.collector_targets().len()
            )?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut profile = TranscriptProfile::Healthy;
    let mut config = AgentConfig::new();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--profile" => profile = TranscriptProfile::from_tag(&value()?)?,
            "--slaves" => {
                config = config
                    .with_slave_list(&value()?)
                    .map_err(|err| err.to_string())?;
            }
            "--cycle-ticks" => {
                let raw = value()?;
                let ticks = raw
                    .parse()
                    .map_err(|_| format!("Invalid cycle period `{raw}`"))?;
                config = config.with_cycle_ticks(ticks);
            }
            "--thresholds" => config = config.with_thresholds(parse_thresholds(&value()?)?),
            _ => return Err(format!("Unknown option `{flag}`")),
        }
    }

    config.validate().map_err(|err| err.to_string())?;
    Ok(Options { profile, config })
}

fn parse_thresholds(text: &str) -> Result<Thresholds, String> {
    let parts: Vec<u16> = text
        .split(',')
        .map(|part| part.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("Invalid thresholds `{text}`"))?;
    match parts.as_slice() {
        [bus, network, upload] => Ok(Thresholds::new(*bus, *network, *upload)),
        _ => Err(format!("Expected three thresholds, got `{text}`")),
    }
}
