//! Command tags per link
//!
//! The same byte means different things on different links (`b` is a bid
//! on the Agent→House link and a block request on the House→Bank link), so
//! each link gets its own enum.

/// Generates a tag enum with `tag()` / `from_tag()`
macro_rules! define_commands {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Wire byte for this command
            pub const fn tag(self) -> u8 {
                match self {
                    $($name::$variant => $tag),+
                }
            }

            /// Decode a wire byte; `None` for tags unknown on this link
            pub fn from_tag(tag: u8) -> Option<Self> {
                match tag {
                    $($tag => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

define_commands! {
    /// Agent → Bank requests
    AgentBankCommand {
        /// Stream the house directory
        Directory = b'a',
        /// Own balance and blocked funds
        Balance = b'b',
        /// Move blocked funds to a house account
        Transfer = b'T',
        Disconnect = b'0',
    }
}

define_commands! {
    /// House → Bank requests
    HouseBankCommand {
        Block = b'b',
        Unblock = b'u',
        Disconnect = b'0',
    }
}

define_commands! {
    /// Agent → House requests
    AgentHouseCommand {
        /// Stream live auctions
        List = b'a',
        Bid = b'b',
        Disconnect = b'0',
    }
}

define_commands! {
    /// House → Agent frames: replies carry the tag of the request they answer
    HouseAgentFrame {
        ListReply = b'a',
        BidReply = b'b',
        Outbid = b'o',
        Won = b'w',
        Disconnect = b'0',
    }
}
