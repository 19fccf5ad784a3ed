use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::history::{HistoryEntry, ScanStatus, ScanType};

/// Event reported by the device-integrity SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegritySignal {
    Rooted,
    Emulator,
    Tampered,
    Hooked,
    Debugger,
    UnofficialStore,
}

impl IntegritySignal {
    pub const ALL: [IntegritySignal; 6] = [
        Self::Rooted,
        Self::Emulator,
        Self::Tampered,
        Self::Hooked,
        Self::Debugger,
        Self::UnofficialStore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rooted => "rooted",
            Self::Emulator => "emulator",
            Self::Tampered => "tampered",
            Self::Hooked => "hooked",
            Self::Debugger => "debugger",
            Self::UnofficialStore => "unofficial_store",
        }
    }
}

impl fmt::Display for IntegritySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegritySignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|signal| signal.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown integrity signal `{s}` (expected one of {})", names.join(", "))
            })
    }
}

/// Tri-level device status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntegrityStatus {
    #[default]
    Green,
    Orange,
    Red,
}

impl fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Green => "GREEN",
            Self::Orange => "ORANGE",
            Self::Red => "RED",
        })
    }
}

/// Accumulated flags. Once a flag is raised it stays raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityState {
    pub rooted: bool,
    pub emulator: bool,
    pub tampered: bool,
    pub hooked: bool,
    pub debugger: bool,
    pub unofficial_store: bool,
    pub status: IntegrityStatus,
}

impl IntegrityState {
    /// Fold one signal in and recompute the status.
    pub fn apply(&mut self, signal: IntegritySignal) {
        match signal {
            IntegritySignal::Rooted => self.rooted = true,
            IntegritySignal::Emulator => self.emulator = true,
            IntegritySignal::Tampered => self.tampered = true,
            IntegritySignal::Hooked => self.hooked = true,
            IntegritySignal::Debugger => self.debugger = true,
            IntegritySignal::UnofficialStore => self.unofficial_store = true,
        }
        self.status = self.derive_status();
    }

    /// Names of the raised flags, in signal order.
    pub fn raised(&self) -> Vec<&'static str> {
        [
            (self.rooted, IntegritySignal::Rooted),
            (self.emulator, IntegritySignal::Emulator),
            (self.tampered, IntegritySignal::Tampered),
            (self.hooked, IntegritySignal::Hooked),
            (self.debugger, IntegritySignal::Debugger),
            (self.unofficial_store, IntegritySignal::UnofficialStore),
        ]
        .into_iter()
        .filter(|(raised, _)| *raised)
        .map(|(_, signal)| signal.as_str())
        .collect()
    }

    /// `System` history record for this state.
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry::new(
            ScanType::System,
            ScanStatus::from(self.status),
            format!("Device integrity: {}", self.status),
        )
        .with_field("signals", self.raised())
    }

    fn derive_status(&self) -> IntegrityStatus {
        if self.rooted || self.tampered || self.hooked {
            IntegrityStatus::Red
        } else if self.emulator || self.debugger || self.unofficial_store {
            IntegrityStatus::Orange
        } else {
            IntegrityStatus::Green
        }
    }
}

/// Pure reduction over a batch of signals.
pub fn reduce<I>(signals: I) -> IntegrityState
where
    I: IntoIterator<Item = IntegritySignal>,
{
    signals
        .into_iter()
        .fold(IntegrityState::default(), |mut state, signal| {
            state.apply(signal);
            state
        })
}

/// Handle to a running reducer task.
pub struct IntegrityMonitor {
    pub sender: mpsc::Sender<IntegritySignal>,
    pub state: watch::Receiver<IntegrityState>,
    pub task: JoinHandle<IntegrityState>,
}

/// Spawn the single reducer that owns the integrity state.
///
/// The task ends once every sender is dropped and returns the final state.
pub fn spawn_monitor(buffer: usize) -> IntegrityMonitor {
    let (sender, mut receiver) = mpsc::channel(buffer.max(1));
    let (publisher, state) = watch::channel(IntegrityState::default());
    let task = tokio::spawn(async move {
        let mut current = IntegrityState::default();
        while let Some(signal) = receiver.recv().await {
            let before = current.status;
            current.apply(signal);
            if current.status != before {
                match current.status {
                    IntegrityStatus::Red => warn!(%signal, status = %current.status, "device integrity compromised"),
                    _ => info!(%signal, status = %current.status, "device integrity status changed"),
                }
            }
            // No receivers left is fine; the final state is still returned.
            let _ = publisher.send(current.clone());
        }
        current
    });
    IntegrityMonitor {
        sender,
        state,
        task,
    }
}
