//! Line commands for the terminal front end.
//!
//! ```text
//! connect | disconnect | save | quit | help | status
//! angle <deg> | mode manual|recipe | recipe <slot> | apply <slot>
//! ai <max> <prompt...> | key <api key>
//! host <h> | port <n> | tls on|off | user <name> | pass <secret>
//! ```

use thiserror::Error;

use crate::console::OperatorIntent;
use crate::device::state::Mode;
use crate::mqtt::config::{ConnectionProfile, TransportSecurity};

pub const HELP: &str = "\
commands:
  connect | disconnect | status | save | quit
  angle <deg>          set the servo angle (0-140)
  mode manual|recipe   switch device mode
  recipe <slot>        select recipe slot 1-3
  ai <max> <prompt>    request an AI recipe draft
  apply <slot>         apply the accepted draft to a slot
  key <api key>        store the AI key (empty removes it)
  host <h> | port <n> | tls on|off | user <name> | pass <secret>";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("'{command}' needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("'{value}' is not a valid {what}")]
    InvalidValue { value: String, what: &'static str },
}

/// Edits to the working connection profile; they take effect on the next
/// `connect` or `save`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEdit {
    Host(String),
    Port(u32),
    Security(TransportSecurity),
    Username(Option<String>),
    Secret(Option<String>),
}

impl ProfileEdit {
    pub fn apply(self, profile: &mut ConnectionProfile) {
        match self {
            ProfileEdit::Host(host) => profile.host = host,
            ProfileEdit::Port(port) => profile.port = port,
            ProfileEdit::Security(transport) => profile.transport = transport,
            ProfileEdit::Username(username) => profile.username = username,
            ProfileEdit::Secret(secret) => profile.secret = secret,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Connect with the working profile
    Connect,
    /// Persist the working profile
    Save,
    Edit(ProfileEdit),
    Intent(OperatorIntent),
    Status,
    Help,
    Quit,
}

fn number<N: std::str::FromStr>(value: &str, what: &'static str) -> Result<N, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidValue {
        value: value.to_string(),
        what,
    })
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<OperatorCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "connect" => OperatorCommand::Connect,
        "disconnect" => OperatorCommand::Intent(OperatorIntent::Disconnect),
        "save" => OperatorCommand::Save,
        "status" => OperatorCommand::Status,
        "help" | "?" => OperatorCommand::Help,
        "quit" | "exit" => OperatorCommand::Quit,
        "angle" => {
            if rest.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "angle",
                    what: "an angle in degrees",
                });
            }
            OperatorCommand::Intent(OperatorIntent::SetAngle(number(rest, "angle")?))
        }
        "mode" => {
            let mode = match rest.to_ascii_lowercase().as_str() {
                "manual" | "0" => Mode::Manual,
                "recipe" | "1" => Mode::Recipe,
                "" => {
                    return Err(ParseError::MissingArgument {
                        command: "mode",
                        what: "'manual' or 'recipe'",
                    })
                }
                _ => {
                    return Err(ParseError::InvalidValue {
                        value: rest.to_string(),
                        what: "mode",
                    })
                }
            };
            OperatorCommand::Intent(OperatorIntent::SetMode(mode))
        }
        "recipe" => {
            let slot = if rest.is_empty() {
                None
            } else {
                Some(number(rest, "recipe slot")?)
            };
            OperatorCommand::Intent(OperatorIntent::SelectRecipe(slot))
        }
        "apply" => {
            let slot = if rest.is_empty() {
                None
            } else {
                Some(number(rest, "recipe slot")?)
            };
            OperatorCommand::Intent(OperatorIntent::ApplyAiDraft(slot))
        }
        "ai" => {
            let (max, prompt) = match rest.split_once(char::is_whitespace) {
                Some((max, prompt)) => (max, prompt.trim()),
                None => (rest, ""),
            };
            if max.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "ai",
                    what: "a maximum angle",
                });
            }
            OperatorCommand::Intent(OperatorIntent::RequestAiDraft {
                prompt: prompt.to_string(),
                max_angle: number(max, "maximum angle")?,
            })
        }
        "key" => OperatorCommand::Intent(OperatorIntent::SaveAiKey(rest.to_string())),
        "host" => {
            if rest.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "host",
                    what: "a host name",
                });
            }
            OperatorCommand::Edit(ProfileEdit::Host(rest.to_string()))
        }
        "port" => {
            if rest.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "port",
                    what: "a port number",
                });
            }
            OperatorCommand::Edit(ProfileEdit::Port(number(rest, "port")?))
        }
        "tls" => {
            let security = match rest.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => TransportSecurity::Tls,
                "off" | "false" | "0" => TransportSecurity::Plain,
                _ => {
                    return Err(ParseError::InvalidValue {
                        value: rest.to_string(),
                        what: "tls switch (on/off)",
                    })
                }
            };
            OperatorCommand::Edit(ProfileEdit::Security(security))
        }
        "user" => OperatorCommand::Edit(ProfileEdit::Username(optional(rest))),
        "pass" => OperatorCommand::Edit(ProfileEdit::Secret(optional(rest))),
        _ => return Err(ParseError::Unknown(word.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(line: &str) -> OperatorIntent {
        match parse_line(line) {
            Ok(Some(OperatorCommand::Intent(intent))) => intent,
            other => panic!("{line:?} parsed to {other:?}"),
        }
    }

    #[test]
    fn control_commands() {
        assert_eq!(intent("angle 90"), OperatorIntent::SetAngle(90.0));
        assert_eq!(intent("  ANGLE   12.5 "), OperatorIntent::SetAngle(12.5));
        assert_eq!(intent("mode recipe"), OperatorIntent::SetMode(Mode::Recipe));
        assert_eq!(intent("mode 0"), OperatorIntent::SetMode(Mode::Manual));
        assert_eq!(intent("recipe 2"), OperatorIntent::SelectRecipe(Some(2)));
        assert_eq!(intent("recipe"), OperatorIntent::SelectRecipe(None));
        assert_eq!(intent("apply 3"), OperatorIntent::ApplyAiDraft(Some(3)));
        assert_eq!(intent("disconnect"), OperatorIntent::Disconnect);
    }

    #[test]
    fn ai_request_keeps_the_whole_prompt() {
        assert_eq!(
            intent("ai 90 slow wave,   then rest"),
            OperatorIntent::RequestAiDraft {
                prompt: "slow wave,   then rest".into(),
                max_angle: 90.0,
            }
        );
        assert_eq!(
            intent("ai 140"),
            OperatorIntent::RequestAiDraft {
                prompt: String::new(),
                max_angle: 140.0,
            }
        );
        assert!(matches!(
            parse_line("ai"),
            Err(ParseError::MissingArgument { command: "ai", .. })
        ));
    }

    #[test]
    fn profile_edits_apply_to_working_profile() {
        let mut profile = ConnectionProfile::default();
        for line in ["host pi.local", "port 8884", "tls on", "user op", "pass pw"] {
            match parse_line(line).unwrap() {
                Some(OperatorCommand::Edit(edit)) => edit.apply(&mut profile),
                other => panic!("{line:?} parsed to {other:?}"),
            }
        }
        assert_eq!(profile.host, "pi.local");
        assert_eq!(profile.port, 8884);
        assert_eq!(profile.transport, TransportSecurity::Tls);
        assert_eq!(profile.username.as_deref(), Some("op"));
        assert_eq!(profile.secret.as_deref(), Some("pw"));

        match parse_line("pass").unwrap() {
            Some(OperatorCommand::Edit(edit)) => edit.apply(&mut profile),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(profile.secret, None);
    }

    #[test]
    fn bad_input_is_reported() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(
            parse_line("jump 3"),
            Err(ParseError::Unknown("jump".into()))
        );
        assert!(matches!(
            parse_line("angle ninety"),
            Err(ParseError::InvalidValue { what: "angle", .. })
        ));
        assert!(matches!(
            parse_line("recipe 300"),
            Err(ParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_line("mode fast"),
            Err(ParseError::InvalidValue { what: "mode", .. })
        ));
        assert!(matches!(parse_line("tls maybe"), Err(ParseError::InvalidValue { .. })));
        assert!(matches!(parse_line("port"), Err(ParseError::MissingArgument { .. })));
    }

    #[test]
    fn empty_key_clears_the_credential() {
        assert_eq!(intent("key"), OperatorIntent::SaveAiKey(String::new()));
        assert_eq!(intent("key sk-123"), OperatorIntent::SaveAiKey("sk-123".into()));
    }
}
