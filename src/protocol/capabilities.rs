//! Capability and server status flags.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Client/server capability flags.
///
/// The low 32 bits are the standard MySQL flags; the high 32 bits are MariaDB
/// extended capabilities, carried separately in the handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilityFlags(u64);

impl CapabilityFlags {
    pub const LONG_PASSWORD: Self = Self(1 << 0);
    pub const FOUND_ROWS: Self = Self(1 << 1);
    pub const LONG_FLAG: Self = Self(1 << 2);
    pub const CONNECT_WITH_DB: Self = Self(1 << 3);
    pub const NO_SCHEMA: Self = Self(1 << 4);
    pub const COMPRESS: Self = Self(1 << 5);
    pub const ODBC: Self = Self(1 << 6);
    pub const LOCAL_FILES: Self = Self(1 << 7);
    pub const IGNORE_SPACE: Self = Self(1 << 8);
    pub const PROTOCOL_41: Self = Self(1 << 9);
    pub const INTERACTIVE: Self = Self(1 << 10);
    pub const SSL: Self = Self(1 << 11);
    pub const IGNORE_SIGPIPE: Self = Self(1 << 12);
    pub const TRANSACTIONS: Self = Self(1 << 13);
    pub const RESERVED: Self = Self(1 << 14);
    pub const SECURE_CONNECTION: Self = Self(1 << 15);
    pub const MULTI_STATEMENTS: Self = Self(1 << 16);
    pub const MULTI_RESULTS: Self = Self(1 << 17);
    pub const PS_MULTI_RESULTS: Self = Self(1 << 18);
    pub const PLUGIN_AUTH: Self = Self(1 << 19);
    pub const CONNECT_ATTRS: Self = Self(1 << 20);
    pub const PLUGIN_AUTH_LENENC_CLIENT_DATA: Self = Self(1 << 21);
    pub const CAN_HANDLE_EXPIRED_PASSWORDS: Self = Self(1 << 22);
    pub const SESSION_TRACK: Self = Self(1 << 23);
    pub const DEPRECATE_EOF: Self = Self(1 << 24);
    pub const OPTIONAL_RESULTSET_METADATA: Self = Self(1 << 25);
    pub const ZSTD_COMPRESSION: Self = Self(1 << 26);
    pub const QUERY_ATTRIBUTES: Self = Self(1 << 27);
    pub const MULTI_FACTOR_AUTHENTICATION: Self = Self(1 << 28);
    pub const CAPABILITY_EXTENSION: Self = Self(1 << 29);
    pub const SSL_VERIFY_SERVER_CERT: Self = Self(1 << 30);
    pub const REMEMBER_OPTIONS: Self = Self(1 << 31);

    // MariaDB extended capabilities
    pub const MARIADB_CLIENT_PROGRESS: Self = Self(1 << 32);
    pub const MARIADB_CLIENT_COM_MULTI: Self = Self(1 << 33);
    pub const MARIADB_CLIENT_STMT_BULK_OPERATIONS: Self = Self(1 << 34);
    pub const MARIADB_CLIENT_EXTENDED_METADATA: Self = Self(1 << 35);
    pub const MARIADB_CLIENT_CACHE_METADATA: Self = Self(1 << 36);

    /// What a server must offer for this driver to talk to it at all.
    pub const REQUIRED: Self = Self(Self::PROTOCOL_41.0 | Self::SECURE_CONNECTION.0);

    /// What the driver asks for by default (before intersecting with the server).
    pub const CLIENT_DEFAULT: Self = Self(
        Self::LONG_PASSWORD.0
            | Self::PROTOCOL_41.0
            | Self::TRANSACTIONS.0
            | Self::SECURE_CONNECTION.0
            | Self::MULTI_STATEMENTS.0
            | Self::MULTI_RESULTS.0
            | Self::PS_MULTI_RESULTS.0
            | Self::PLUGIN_AUTH.0
            | Self::CONNECT_ATTRS.0
            | Self::PLUGIN_AUTH_LENENC_CLIENT_DATA.0
            | Self::SESSION_TRACK.0
            | Self::DEPRECATE_EOF.0,
    );

    /// Flags this driver cannot honour and never requests.
    pub const UNSUPPORTED: Self = Self(
        Self::FOUND_ROWS.0
            | Self::COMPRESS.0
            | Self::IGNORE_SIGPIPE.0
            | Self::CAN_HANDLE_EXPIRED_PASSWORDS.0
            | Self::ZSTD_COMPRESSION.0
            | Self::LOCAL_FILES.0
            | Self::OPTIONAL_RESULTSET_METADATA.0
            | Self::QUERY_ATTRIBUTES.0
            | Self::MULTI_FACTOR_AUTHENTICATION.0
            | Self::MARIADB_CLIENT_COM_MULTI.0
            | Self::MARIADB_CLIENT_STMT_BULK_OPERATIONS.0
            | Self::MARIADB_CLIENT_EXTENDED_METADATA.0
            | Self::MARIADB_CLIENT_CACHE_METADATA.0,
    );

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Combine the standard 32-bit word with the MariaDB extension word.
    pub const fn from_parts(standard: u32, extended: u32) -> Self {
        Self(standard as u64 | (extended as u64) << 32)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The standard 32-bit word sent in handshake packets.
    pub const fn lower(self) -> u32 {
        self.0 as u32
    }

    /// The MariaDB extension word.
    pub const fn upper(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for CapabilityFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for CapabilityFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl BitAnd for CapabilityFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl fmt::Debug for CapabilityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityFlags({:#x})", self.0)
    }
}

/// Server status flags carried in OK and EOF packets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusFlags(u16);

impl StatusFlags {
    pub const IN_TRANS: Self = Self(0x0001);
    pub const AUTOCOMMIT: Self = Self(0x0002);
    pub const MORE_RESULTS_EXISTS: Self = Self(0x0008);
    pub const NO_GOOD_INDEX_USED: Self = Self(0x0010);
    pub const NO_INDEX_USED: Self = Self(0x0020);
    pub const CURSOR_EXISTS: Self = Self(0x0040);
    pub const LAST_ROW_SENT: Self = Self(0x0080);
    pub const DB_DROPPED: Self = Self(0x0100);
    pub const NO_BACKSLASH_ESCAPES: Self = Self(0x0200);
    pub const METADATA_CHANGED: Self = Self(0x0400);
    pub const QUERY_WAS_SLOW: Self = Self(0x0800);
    pub const PS_OUT_PARAMS: Self = Self(0x1000);
    pub const IN_TRANS_READONLY: Self = Self(0x2000);
    pub const SESSION_STATE_CHANGED: Self = Self(0x4000);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Another result set follows this one in the same reply.
    pub const fn more_results(self) -> bool {
        self.contains(Self::MORE_RESULTS_EXISTS)
    }
}

impl fmt::Debug for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusFlags({:#06x})", self.0)
    }
}
