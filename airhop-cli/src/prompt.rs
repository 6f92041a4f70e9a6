use std::io;

use airhop_session::{CredentialSource, OobInput, SessionError};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Joining-side credentials from `--ssid`/`--password`, or from a line typed
/// (or pasted from a QR reader) on stdin.
pub struct StdinPrompt {
    ssid: Option<String>,
    password: Option<String>,
}

impl StdinPrompt {
    pub fn new(ssid: Option<String>, password: Option<String>) -> Self {
        Self { ssid, password }
    }
}

impl CredentialSource for StdinPrompt {
    async fn next_input(&self) -> Result<OobInput, SessionError> {
        if let Some(password) = &self.password {
            return Ok(OobInput::Typed {
                ssid: self.ssid.clone(),
                password: password.clone(),
            });
        }

        eprint!("Enter the password shown on the other device (or the scanned QR text): ");
        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed before credentials were entered",
            )));
        }
        Ok(classify_line(&line, self.ssid.as_deref()))
    }
}

/// QR payloads carry `ssid;password`; anything else is a typed password.
pub fn classify_line(line: &str, ssid: Option<&str>) -> OobInput {
    let line = line.trim();
    if line.contains(';') {
        OobInput::Scanned(line.to_owned())
    } else {
        OobInput::Typed {
            ssid: ssid.map(str::to_owned),
            password: line.to_owned(),
        }
    }
}
