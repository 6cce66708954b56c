//! Server error codes the driver treats specially.
//!
//! Everything not listed here is command-scoped: it fails the command that
//! received it and the queue moves on.

pub const ER_CON_COUNT_ERROR: u16 = 1040;
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_SERVER_SHUTDOWN: u16 = 1053;
pub const ER_DUP_ENTRY: u16 = 1062;
pub const ER_PARSE_ERROR: u16 = 1064;
pub const ER_SYNTAX_ERROR: u16 = 1149;
pub const ER_ABORTING_CONNECTION: u16 = 1152;
pub const ER_NET_PACKET_TOO_LARGE: u16 = 1153;
pub const ER_NET_PACKETS_OUT_OF_ORDER: u16 = 1156;
pub const ER_NEW_ABORTING_CONNECTION: u16 = 1184;
pub const ER_DUP_ENTRY_WITH_KEY_NAME: u16 = 1586;
pub const ER_CONNECTION_KILLED: u16 = 1927;
pub const ER_CLIENT_INTERACTION_TIMEOUT: u16 = 4031;

/// MariaDB progress report, sent as an ERR packet with this code.
pub const PROGRESS_REPORT: u16 = 0xffff;

/// Codes after which the server has dropped (or is about to drop) the session.
const CONNECTION_FATAL: &[u16] = &[
    ER_CON_COUNT_ERROR,
    ER_SERVER_SHUTDOWN,
    ER_ABORTING_CONNECTION,
    ER_NET_PACKET_TOO_LARGE,
    ER_NET_PACKETS_OUT_OF_ORDER,
    ER_NEW_ABORTING_CONNECTION,
    ER_CONNECTION_KILLED,
    ER_CLIENT_INTERACTION_TIMEOUT,
];

/// Whether a server error received in the command phase ends the connection.
pub fn is_connection_fatal(code: u16) -> bool {
    CONNECTION_FATAL.contains(&code)
}
