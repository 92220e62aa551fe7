//! Gateway intents bitmask
//!
//! Computes the integer sent in the identify payload. Only the bit
//! positions matter to the transport; whether an intent is privileged is
//! enforced server-side.

use bitflags::bitflags;

bitflags! {
    /// Gateway intents
    ///
    /// A 15-bit mask selecting which event groups the gateway delivers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS                    = 1 << 0;
        const GUILD_MEMBERS             = 1 << 1;
        const GUILD_BANS                = 1 << 2;
        const GUILD_EMOJIS              = 1 << 3;
        const GUILD_INTEGRATIONS        = 1 << 4;
        const GUILD_WEBHOOKS            = 1 << 5;
        const GUILD_INVITES             = 1 << 6;
        const GUILD_VOICE_STATES        = 1 << 7;
        const GUILD_PRESENCES           = 1 << 8;
        const GUILD_MESSAGES            = 1 << 9;
        const GUILD_MESSAGE_REACTIONS   = 1 << 10;
        const GUILD_MESSAGE_TYPING      = 1 << 11;
        const DIRECT_MESSAGES           = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS  = 1 << 13;
        const DIRECT_MESSAGE_TYPING     = 1 << 14;

        /// Every defined intent
        const ALL = (1 << 15) - 1;

        /// Intents requiring explicit enablement in the developer portal
        const PRIVILEGED = Self::GUILD_MEMBERS.bits() | Self::GUILD_PRESENCES.bits();

        /// Every intent that needs no portal toggle
        const NON_PRIVILEGED = Self::ALL.bits() & !Self::PRIVILEGED.bits();

        /// The library default set
        const DEFAULT = Self::GUILDS.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_BANS.bits()
            | Self::GUILD_EMOJIS.bits()
            | Self::GUILD_INVITES.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::DIRECT_MESSAGES.bits();
    }
}

impl Intents {
    /// Check if the mask requests any privileged intent
    #[must_use]
    pub const fn has_privileged(self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::DEFAULT
    }
}
