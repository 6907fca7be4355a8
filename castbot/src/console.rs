//! Line-oriented front-end: one command per line on stdin, replies on stdout.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use castcontrol::CommandHandler;
use tracing::{debug, info};

use crate::logging::LogControl;

const PROMPT: &str = "> ";

pub fn serve(handler: &CommandHandler, log_control: &LogControl) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_lines(handler, Some(log_control), stdin.lock(), stdout.lock())
}

/// Serves until end of input or `/quit`.
///
/// `/loglevel LEVEL` is answered here, everything else goes to the handler.
pub fn serve_lines<R: BufRead, W: Write>(
    handler: &CommandHandler,
    log_control: Option<&LogControl>,
    input: R,
    mut output: W,
) -> Result<()> {
    write!(output, "{}", PROMPT)?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        debug!(line=%trimmed, "Console input");

        if trimmed == "/quit" || trimmed == "/exit" {
            break;
        }

        if !trimmed.is_empty() {
            let text = match trimmed.strip_prefix("/loglevel") {
                Some(level) => set_log_level(log_control, level.trim()),
                None => {
                    let reply = handler.handle_line(trimmed);
                    if reply.is_error() {
                        format!("⚠️ {}", reply.text)
                    } else {
                        reply.text
                    }
                }
            };
            writeln!(output, "{}", text)?;
        }

        write!(output, "{}", PROMPT)?;
        output.flush()?;
    }

    writeln!(output)?;
    Ok(())
}

fn set_log_level(log_control: Option<&LogControl>, level: &str) -> String {
    let Some(control) = log_control else {
        return "⚠️ Logging is not initialized".to_string();
    };
    match control.set_level(level) {
        Ok(filter) => {
            info!("Log level changed to: {}", filter);
            format!("Log level set to {}", filter)
        }
        Err(e) => format!("⚠️ {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use castcontrol::{
        CastController, CatalogResolver, ControlError, DeviceDiscovery, DeviceHandle, Resolution,
        SessionSettings,
    };

    struct NoDevices;

    impl DeviceDiscovery for NoDevices {
        fn discover(&self) -> Result<Vec<DeviceHandle>> {
            Ok(Vec::new())
        }
    }

    struct NoLinks;

    impl CatalogResolver for NoLinks {
        fn resolve(&self, link: &str) -> castcontrol::Result<Resolution> {
            Err(ControlError::resolution_failed(link, "offline"))
        }
    }

    fn run(input: &str) -> String {
        let controller = CastController::new(Box::new(NoDevices), SessionSettings::default());
        let handler = CommandHandler::new(controller, Arc::new(NoLinks));
        let mut output = Vec::new();
        serve_lines(&handler, None, input.as_bytes(), &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_replies_and_prompts() {
        let output = run("/help\n\n/stop\n");
        assert!(output.starts_with(PROMPT));
        assert!(output.contains("/queue - show the queue"));
        assert!(output.contains("⚠️ No device selected"));
        assert_eq!(output.matches(PROMPT).count(), 4);
    }

    #[test]
    fn test_quit_stops_reading() {
        let output = run("/quit\n/help\n");
        assert!(!output.contains("/queue"));
    }

    #[test]
    fn test_loglevel_without_logging() {
        let output = run("/loglevel debug\n");
        assert!(output.contains("Logging is not initialized"));
    }

    #[test]
    fn test_resolution_errors_are_shown() {
        let output = run("http://example.test/mix.m3u\n");
        assert!(output.contains("⚠️"));
        assert!(output.contains("offline"));
    }
}
