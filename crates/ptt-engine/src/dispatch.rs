//! Per-mode handler table for external events

use std::fmt;

use crate::engine::Engine;
use crate::error::PttResult;
use crate::event::EventId;

/// Handler invoked with the event an external notification concerns
pub type EventHandler = fn(&mut Engine, EventId) -> PttResult<()>;

/// External notifications routed to the active mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtEvent {
    RfTxFinished,
    RfTxFailed,
    RfRxDone,
    RfRxFailed,
    RfCcaDone,
    RfCcaFailed,
    RfEdDetected,
    RfEdFailed,
    UartPacketReceived,
}

impl fmt::Display for ExtEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handlers of the active mode; `None` marks an event the mode does not support
///
/// The whole table is replaced on every mode switch.
#[derive(Clone, Copy, Default)]
pub struct Handlers {
    pub rf_tx_finished: Option<EventHandler>,
    pub rf_tx_failed: Option<EventHandler>,
    pub rf_rx_done: Option<EventHandler>,
    pub rf_rx_failed: Option<EventHandler>,
    pub rf_cca_done: Option<EventHandler>,
    pub rf_cca_failed: Option<EventHandler>,
    pub rf_ed_detected: Option<EventHandler>,
    pub rf_ed_failed: Option<EventHandler>,
    pub uart_pkt_received: Option<EventHandler>,
}

impl Handlers {
    pub fn get(&self, event: ExtEvent) -> Option<EventHandler> {
        match event {
            ExtEvent::RfTxFinished => self.rf_tx_finished,
            ExtEvent::RfTxFailed => self.rf_tx_failed,
            ExtEvent::RfRxDone => self.rf_rx_done,
            ExtEvent::RfRxFailed => self.rf_rx_failed,
            ExtEvent::RfCcaDone => self.rf_cca_done,
            ExtEvent::RfCcaFailed => self.rf_cca_failed,
            ExtEvent::RfEdDetected => self.rf_ed_detected,
            ExtEvent::RfEdFailed => self.rf_ed_failed,
            ExtEvent::UartPacketReceived => self.uart_pkt_received,
        }
    }

    pub fn supports(&self, event: ExtEvent) -> bool {
        self.get(event).is_some()
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("rf_tx_finished", &self.rf_tx_finished.is_some())
            .field("rf_tx_failed", &self.rf_tx_failed.is_some())
            .field("rf_rx_done", &self.rf_rx_done.is_some())
            .field("rf_rx_failed", &self.rf_rx_failed.is_some())
            .field("rf_cca_done", &self.rf_cca_done.is_some())
            .field("rf_cca_failed", &self.rf_cca_failed.is_some())
            .field("rf_ed_detected", &self.rf_ed_detected.is_some())
            .field("rf_ed_failed", &self.rf_ed_failed.is_some())
            .field("uart_pkt_received", &self.uart_pkt_received.is_some())
            .finish()
    }
}
