use serde::{Deserialize, Serialize};

use crate::models::OrderStatus;

/// Profile status as reported by the provider. `Other` absorbs values the
/// provider adds later so a sweep never fails on an unknown string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EsimStatus {
    GotResource,
    InUse,
    UsedUp,
    UsedExpired,
    Cancel,
    #[serde(untagged)]
    Other(String),
}

/// SM-DP+ download state, the second provider status axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmdpStatus {
    Released,
    Enabled,
    Disabled,
    Deleted,
    #[serde(untagged)]
    Other(String),
}

/// What the caller-facing layer shows for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayStatus {
    Pending,
    Processing,
    Ready,
    Onboard,
    InUse,
    Depleted,
    Expired,
    Cancelled,
    Removed,
    Failed,
}

impl DisplayStatus {
    /// Pre-allocation fallback: no esimStatus yet, display follows the
    /// durable order status.
    pub fn from_order_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Pending => DisplayStatus::Pending,
            OrderStatus::Processing => DisplayStatus::Processing,
            OrderStatus::Allocated => DisplayStatus::Ready,
            OrderStatus::Failed => DisplayStatus::Failed,
            OrderStatus::Cancelled => DisplayStatus::Cancelled,
        }
    }
}

/// Derived view of one (esimStatus, smdpStatus) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    /// None when esimStatus is absent; callers fall back to
    /// [`DisplayStatus::from_order_status`].
    pub display: Option<DisplayStatus>,
    pub show_usage: bool,
    pub cancelable: bool,
}

impl Derived {
    const fn new(display: Option<DisplayStatus>, show_usage: bool, cancelable: bool) -> Self {
        Self {
            display,
            show_usage,
            cancelable,
        }
    }
}

/// Single source of truth for display status, usage visibility and cancel
/// eligibility. The reconciler, top-up and cancel services all go through
/// here; nothing else may interpret the raw status pair.
///
/// A DELETED smdpStatus overrides every esimStatus value. A profile is
/// cancelable only while it sits untouched at the provider
/// (GOT_RESOURCE + RELEASED); the moment it is downloaded to a device the
/// window closes.
pub fn derive(esim: Option<&EsimStatus>, smdp: Option<&SmdpStatus>) -> Derived {
    if matches!(smdp, Some(SmdpStatus::Deleted)) {
        return Derived::new(Some(DisplayStatus::Removed), false, false);
    }

    match esim {
        None => Derived::new(None, false, false),
        Some(EsimStatus::GotResource) => match smdp {
            Some(SmdpStatus::Released) => Derived::new(Some(DisplayStatus::Ready), false, true),
            // ENABLED, DISABLED, unknown, or absent: already onboard a device.
            _ => Derived::new(Some(DisplayStatus::Onboard), true, false),
        },
        Some(EsimStatus::InUse) => Derived::new(Some(DisplayStatus::InUse), true, false),
        Some(EsimStatus::UsedUp) => Derived::new(Some(DisplayStatus::Depleted), true, false),
        Some(EsimStatus::UsedExpired) => Derived::new(Some(DisplayStatus::Expired), false, false),
        Some(EsimStatus::Cancel) => Derived::new(Some(DisplayStatus::Cancelled), false, false),
        // Unknown provider value: show nothing risky, allow nothing.
        Some(EsimStatus::Other(_)) => Derived::new(None, false, false),
    }
}
