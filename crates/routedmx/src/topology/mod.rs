// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service, session and channel model.
//!
//! ```text
//! Service (bootstrap endpoint, tune mode, signaling versions)
//!   └── Session (destination or bootstrap socket)
//!         └── Channel (TSI: code points, TOI template, static files)
//! ```

mod channel;
mod reconcile;
mod service;
mod template;

pub use channel::{
    Channel, ChannelDecl, CodePoint, RepresentationRef, SplitObject, SplitPart, StaticFile,
    GHOST_INIT_NAME, GHOST_INIT_TOI,
};
pub(crate) use reconcile::{reconcile, TopologyChanges};
pub use reconcile::SessionDecl;
pub use service::{Service, Session, SignalingState, TuneMode};
pub use template::ToiTemplate;

use serde::{Deserialize, Serialize};

/// Delivery protocol of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// ATSC 3.0 ROUTE.
    #[default]
    Route,
    /// FLUTE (DVB-MABR and generic file delivery).
    Flute,
}

/// Which services to tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSelector {
    /// Every service.
    #[default]
    All,
    /// The first service announced.
    First,
    /// One service by identifier.
    Id(u32),
}

impl ServiceSelector {
    /// Raw selector value meaning all services.
    pub const RAW_ALL: u32 = 0xFFFF_FFFF;
    /// Raw selector value meaning the first service.
    pub const RAW_FIRST: u32 = 0xFFFF_FFFE;

    pub fn from_raw(value: u32) -> Self {
        match value {
            Self::RAW_ALL => ServiceSelector::All,
            Self::RAW_FIRST => ServiceSelector::First,
            id => ServiceSelector::Id(id),
        }
    }

    pub(crate) fn selects(&self, service_id: u32, is_first: bool) -> bool {
        match *self {
            ServiceSelector::All => true,
            ServiceSelector::First => is_first,
            ServiceSelector::Id(id) => id == service_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_raw_values() {
        assert_eq!(ServiceSelector::from_raw(0xFFFF_FFFF), ServiceSelector::All);
        assert_eq!(ServiceSelector::from_raw(0xFFFF_FFFE), ServiceSelector::First);
        assert_eq!(ServiceSelector::from_raw(12), ServiceSelector::Id(12));
    }

    #[test]
    fn test_selector_matching() {
        assert!(ServiceSelector::All.selects(3, false));
        assert!(ServiceSelector::First.selects(3, true));
        assert!(!ServiceSelector::First.selects(3, false));
        assert!(ServiceSelector::Id(3).selects(3, false));
        assert!(!ServiceSelector::Id(4).selects(3, true));
    }
}
