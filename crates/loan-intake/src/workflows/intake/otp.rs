use chrono::{DateTime, Utc};
use serde::Serialize;

use super::validation::is_complete_otp;

/// Ticks the resend control stays disabled after a code is issued.
pub const DEFAULT_RESEND_COOLDOWN: u32 = 60;

pub const OTP_REJECTED_NOTICE: &str = "The code is incorrect or expired. Check it and try again.";
pub const OTP_RESEND_FAILED_NOTICE: &str = "We could not send a new code. Try again shortly.";

/// Resend cooldown and verify guard for the OTP step.
#[derive(Debug, Clone)]
pub struct OtpSession {
    cooldown: u32,
    cooldown_remaining: u32,
    last_issued_at: Option<DateTime<Utc>>,
    verify_in_flight: bool,
    last_submitted: Option<String>,
}

/// Serializable snapshot of the OTP session for views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpStatusView {
    pub cooldown_remaining: u32,
    pub resend_available: bool,
    pub verifying: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_issued_at: Option<DateTime<Utc>>,
}

impl Default for OtpSession {
    fn default() -> Self {
        Self::with_cooldown(DEFAULT_RESEND_COOLDOWN)
    }
}

impl OtpSession {
    pub fn with_cooldown(cooldown: u32) -> Self {
        Self {
            cooldown,
            cooldown_remaining: 0,
            last_issued_at: None,
            verify_in_flight: false,
            last_submitted: None,
        }
    }

    /// Start a fresh cooldown for a code issued at `issued_at`.
    pub fn code_issued(&mut self, issued_at: DateTime<Utc>) {
        self.cooldown_remaining = self.cooldown;
        self.last_issued_at = Some(issued_at);
        self.last_submitted = None;
    }

    pub fn tick(&mut self) {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
    }

    pub fn elapse(&mut self, ticks: u32) {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(ticks);
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown_remaining
    }

    pub fn resend_available(&self) -> bool {
        self.cooldown_remaining == 0
    }

    pub fn last_issued_at(&self) -> Option<DateTime<Utc>> {
        self.last_issued_at
    }

    pub fn verify_in_flight(&self) -> bool {
        self.verify_in_flight
    }

    /// Observe the current buffer and decide whether a verify call should fire.
    ///
    /// Fires at most once per distinct complete buffer value and never while
    /// another verify call is in flight. Returns the code to verify.
    pub fn observe_buffer(&mut self, buffer: &str) -> Option<String> {
        if !is_complete_otp(buffer) {
            // Any edit away from a complete code re-arms verification.
            self.last_submitted = None;
            return None;
        }
        if self.verify_in_flight || self.last_submitted.as_deref() == Some(buffer) {
            return None;
        }

        self.verify_in_flight = true;
        self.last_submitted = Some(buffer.to_string());
        Some(buffer.to_string())
    }

    pub fn verify_settled(&mut self) {
        self.verify_in_flight = false;
    }

    /// The verify call never settled; the same digits may be submitted again.
    pub fn verify_abandoned(&mut self) {
        self.verify_in_flight = false;
        self.last_submitted = None;
    }

    pub fn status(&self) -> OtpStatusView {
        OtpStatusView {
            cooldown_remaining: self.cooldown_remaining,
            resend_available: self.resend_available(),
            verifying: self.verify_in_flight,
            last_issued_at: self.last_issued_at,
        }
    }
}
