//! `beep`: play an audible cue, then run the enclosed actions.
//!
//! ```text
//! action beep
//!     beep twice
//!     boop
//!     beep 3
//! end
//! ```
//!
//! Every `beep` and `boop` line is played in order. A line's count is `once`,
//! `twice` or a non-negative integer, and defaults to once.

use super::release;
use crate::action::{Action, ActionContext, Children};
use crate::error::{ActionError, ScanResult};
use crate::hardware::{DeviceKind, ToneGenerator};
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const TONE_LENGTH: Duration = Duration::from_millis(300);
const DEFAULT_GAP_MS: u64 = 200;

/// One kind of tone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cue {
    /// High tone.
    Beep,
    /// Low tone.
    Boop,
}

impl Cue {
    pub fn frequency_hz(self) -> f64 {
        match self {
            Cue::Beep => 1000.0,
            Cue::Boop => 600.0,
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "beep" => Some(Cue::Beep),
            "boop" => Some(Cue::Boop),
            _ => None,
        }
    }
}

fn repetitions(keyword: &str, values: &[String]) -> Result<u32, ActionError> {
    match values.first().map(String::as_str) {
        None | Some("once") => Ok(1),
        Some("twice") => Ok(2),
        Some(other) => other.parse().map_err(|_| {
            ActionError::Parameter(format!(
                "'{keyword}' count must be 'once', 'twice' or a non-negative integer, got '{other}'"
            ))
        }),
    }
}

/// Audible cue leaf.
pub struct Beep {
    sequence: Vec<(Cue, u32)>,
    gap: Duration,
    channel: Option<String>,
    device: Option<Arc<dyn ToneGenerator>>,
}

impl Beep {
    pub fn new() -> Self {
        Self {
            sequence: Vec::new(),
            gap: Duration::from_millis(DEFAULT_GAP_MS),
            channel: None,
            device: None,
        }
    }

    /// Cues in playing order, with their repetition counts.
    pub fn sequence(&self) -> &[(Cue, u32)] {
        &self.sequence
    }
}

impl Default for Beep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for Beep {
    async fn setup(
        &mut self,
        params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        self.sequence = params
            .entries()
            .iter()
            .filter_map(|p| Cue::from_keyword(&p.keyword).map(|cue| (cue, p)))
            .map(|(cue, p)| repetitions(&p.keyword, &p.values).map(|n| (cue, n)))
            .collect::<Result<_, _>>()?;
        if self.sequence.is_empty() {
            warn!("No 'beep' or 'boop' lines; nothing will play");
        }
        self.gap = Duration::from_millis(params.parse_or("gap_ms", DEFAULT_GAP_MS)?);

        let channel = params.first("device").unwrap_or("default").to_string();
        let device = ctx
            .connections
            .acquire_tone(&channel)
            .await
            .map_err(ActionError::resource)?;
        self.channel = Some(channel);
        self.device = Some(device);
        Ok(())
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| ActionError::Runtime("tone output is not open".to_string()))?;

        for &(cue, count) in &self.sequence {
            for _ in 0..count {
                debug!(?cue, "Playing tone");
                device
                    .play(cue.frequency_hz(), TONE_LENGTH)
                    .await
                    .map_err(ActionError::runtime)?;
                tokio::time::sleep(self.gap).await;
            }
        }
        children.run_all(ctx).await
    }

    async fn cleanup(
        &mut self,
        _params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        self.device = None;
        match self.channel.take() {
            Some(channel) => release(ctx, DeviceKind::Tone, &channel).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_repetitions() {
        assert_eq!(repetitions("beep", &[]).unwrap(), 1);
        assert_eq!(repetitions("beep", &values(&["once"])).unwrap(), 1);
        assert_eq!(repetitions("boop", &values(&["twice"])).unwrap(), 2);
        assert_eq!(repetitions("boop", &values(&["0"])).unwrap(), 0);
        assert_eq!(repetitions("beep", &values(&["4"])).unwrap(), 4);
        assert!(repetitions("beep", &values(&["thrice"])).is_err());
        assert!(repetitions("beep", &values(&["-1"])).is_err());
    }

    #[test]
    fn test_cue_keywords() {
        assert_eq!(Cue::from_keyword("BOOP"), Some(Cue::Boop));
        assert_eq!(Cue::from_keyword("gap_ms"), None);
        assert!(Cue::Beep.frequency_hz() > Cue::Boop.frequency_hz());
    }
}
