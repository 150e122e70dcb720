//! Line-oriented operator console
//!
//! Each input line is one command, e.g. `config gain=40 target_frequencies=173043000`.

use std::ops::ControlFlow;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::GcsConfig;
use crate::session::SessionHandle;

pub const HELP: &str = "\
commands:
  connect                    open the radio link and sync with the drone
  cancel-connect             abandon a sync still waiting for an answer
  config [key=value ...]     send ping finder settings (overrides the config file)
  cancel-config
  start | cancel-start
  stop | cancel-stop
  disconnect                 stop the drone and close the link
  state                      print the lifecycle state
  freqs                      list frequencies with telemetry
  pings <freq>               list pings heard on a frequency
  clear <freq> | clear-all   drop stored telemetry
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Connect,
    CancelConnect,
    Config(Vec<(String, String)>),
    CancelConfig,
    Start,
    CancelStart,
    Stop,
    CancelStop,
    Disconnect,
    State,
    Frequencies,
    Pings(u32),
    Clear(u32),
    ClearAll,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            anyhow::bail!("empty command");
        };

        let command = match verb {
            "connect" => ConsoleCommand::Connect,
            "cancel-connect" => ConsoleCommand::CancelConnect,
            "config" => ConsoleCommand::Config(
                words
                    .by_ref()
                    .map(|word| {
                        word.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .with_context(|| format!("expected key=value, got '{word}'"))
                    })
                    .collect::<Result<_>>()?,
            ),
            "cancel-config" => ConsoleCommand::CancelConfig,
            "start" => ConsoleCommand::Start,
            "cancel-start" => ConsoleCommand::CancelStart,
            "stop" => ConsoleCommand::Stop,
            "cancel-stop" => ConsoleCommand::CancelStop,
            "disconnect" => ConsoleCommand::Disconnect,
            "state" => ConsoleCommand::State,
            "freqs" => ConsoleCommand::Frequencies,
            "pings" => ConsoleCommand::Pings(frequency_arg(words.next())?),
            "clear" => ConsoleCommand::Clear(frequency_arg(words.next())?),
            "clear-all" => ConsoleCommand::ClearAll,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => anyhow::bail!("unknown command '{other}', try 'help'"),
        };

        if let Some(extra) = words.next() {
            anyhow::bail!("unexpected argument '{extra}'");
        }
        Ok(command)
    }
}

fn frequency_arg(word: Option<&str>) -> Result<u32> {
    let word = word.context("missing frequency")?;
    word.parse()
        .with_context(|| format!("'{word}' is not a frequency in Hz"))
}

/// Run one command against the session
pub async fn execute(
    command: ConsoleCommand,
    session: &SessionHandle,
    config: &GcsConfig,
) -> Result<ControlFlow<()>> {
    match command {
        ConsoleCommand::Connect => {
            let timing = config.ack.timing()?;
            session.connect(config.radio.clone(), timing).await?;
        }
        ConsoleCommand::CancelConnect => report_cancel("connect", session.cancel_connect().await?),
        ConsoleCommand::Config(fields) => {
            let settings = config
                .ping_finder
                .with_fields(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
            session.send_config(settings).await?;
        }
        ConsoleCommand::CancelConfig => report_cancel("config", session.cancel_config().await?),
        ConsoleCommand::Start => session.send_start().await?,
        ConsoleCommand::CancelStart => report_cancel("start", session.cancel_start().await?),
        ConsoleCommand::Stop => session.send_stop().await?,
        ConsoleCommand::CancelStop => report_cancel("stop", session.cancel_stop().await?),
        ConsoleCommand::Disconnect => session.disconnect().await?,
        ConsoleCommand::State => info!("State: {}", session.state().await?),
        ConsoleCommand::Frequencies => {
            let freqs = session.telemetry().frequencies().await;
            info!("Frequencies with telemetry: {freqs:?}");
        }
        ConsoleCommand::Pings(freq) => {
            let telemetry = session.telemetry();
            for ping in telemetry.pings_for(freq).await {
                info!(
                    "{freq} Hz: amplitude {:.2} at ({:.1}, {:.1})",
                    ping.amplitude, ping.easting, ping.northing
                );
            }
            if let Some(est) = telemetry.estimate_for(freq).await {
                info!("{freq} Hz: estimate ({:.1}, {:.1})", est.easting, est.northing);
            }
        }
        ConsoleCommand::Clear(freq) => {
            let cleared = session.telemetry().clear_frequency(freq).await;
            info!("Cleared {freq} Hz: {cleared}");
        }
        ConsoleCommand::ClearAll => {
            let cleared = session.telemetry().clear_all().await;
            info!("Cleared {} frequencies", cleared.len());
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Ok(ControlFlow::Break(())),
    }
    Ok(ControlFlow::Continue(()))
}

fn report_cancel(phase: &str, cancelled: bool) {
    if cancelled {
        info!("Cancelled {phase}");
    } else {
        info!("No {phase} request to cancel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("connect".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Connect);
        assert_eq!("  stop ".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Stop);
        assert_eq!(
            "pings 173043000".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Pings(173_043_000)
        );
    }

    #[test]
    fn test_parse_config_fields() {
        let command: ConsoleCommand = "config gain=40 target_frequencies=173043000,173920000"
            .parse()
            .unwrap();
        assert_eq!(
            command,
            ConsoleCommand::Config(vec![
                ("gain".into(), "40".into()),
                ("target_frequencies".into(), "173043000,173920000".into()),
            ])
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("launch".parse::<ConsoleCommand>().is_err());
        assert!("config gain".parse::<ConsoleCommand>().is_err());
        assert!("pings".parse::<ConsoleCommand>().is_err());
        assert!("start now".parse::<ConsoleCommand>().is_err());
    }
}
