//! Conversation permission bitmask.
//!
//! A `bitflags`-based access control type generalized to the eight
//! descriptor-kind permissions a conversation can grant.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Permission: u32 {
        const SEND_MESSAGE     = 0b0000_0001;
        const SEND_FILE        = 0b0000_0010;
        const SEND_IMAGE       = 0b0000_0100;
        const SEND_AUDIO       = 0b0000_1000;
        const SEND_VIDEO       = 0b0001_0000;
        const SEND_GEOLOCATION = 0b0010_0000;
        const SEND_TWINCODE    = 0b0100_0000;
        const SEND_COMMAND     = 0b1000_0000;
        /// Group-management permission, used by `setPermissions`.
        const UPDATE_MEMBER    = 0b1_0000_0000;
    }
}

impl Default for Permission {
    fn default() -> Self {
        Permission::SEND_MESSAGE
            | Permission::SEND_FILE
            | Permission::SEND_IMAGE
            | Permission::SEND_AUDIO
            | Permission::SEND_VIDEO
            | Permission::SEND_GEOLOCATION
            | Permission::SEND_TWINCODE
            | Permission::SEND_COMMAND
    }
}
