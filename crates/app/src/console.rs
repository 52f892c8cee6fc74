use std::io::Write;

use async_trait::async_trait;
use services::{Screen, Transport, TransportError};
use tokio::sync::Mutex;
use trainer_core::model::ChannelAddress;

/// Prints screens to stdout and remembers the last screen's buttons so the
/// user can tap them by number.
#[derive(Debug, Default)]
pub struct ConsoleTransport {
    buttons: Mutex<Vec<String>>,
}

impl ConsoleTransport {
    /// Action tag of button `number` (1-based) on the last screen with buttons.
    pub async fn button(&self, number: usize) -> Option<String> {
        let buttons = self.buttons.lock().await;
        number
            .checked_sub(1)
            .and_then(|index| buttons.get(index).cloned())
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn deliver(
        &self,
        channel: &ChannelAddress,
        screens: &[Screen],
    ) -> Result<(), TransportError> {
        let mut out = String::new();
        let mut numbered = Vec::new();
        for screen in screens {
            out.push_str(&screen.text);
            out.push('\n');
            for action in &screen.actions {
                numbered.push(action.action.clone());
                out.push_str(&format!("  [{}] {}\n", numbered.len(), action.label));
            }
            out.push('\n');
        }

        {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(out.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|err| TransportError::Delivery {
                    channel: channel.clone(),
                    reason: err.to_string(),
                })?;
        }

        if !numbered.is_empty() {
            *self.buttons.lock().await = numbered;
        }
        Ok(())
    }
}
