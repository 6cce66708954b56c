//! Connection lifecycle state machine.
//!
//! `Start -> AwaitingGreeting -> [WaitingForTls] -> Authenticating -> Ready -> Closed`
//!
//! The machine is pure: [`Lifecycle::on_event`] takes the current state and an
//! event and returns the next state plus the actions the connection task must
//! carry out (write a packet, start TLS, report success or failure). It never
//! touches I/O itself.

use bytes::BytesMut;
use tracing::{debug, warn};

use super::auth::{AuthState, MYSQL_NATIVE_PASSWORD};
use super::capabilities::{CapabilityFlags, StatusFlags};
use super::handshake::{encode_ssl_request, Greeting, HandshakeResponse};
use super::messages::{
    encode_quit, parse_err, AuthSwitchRequest, OkPacket, AUTH_MORE_DATA_HEADER, EOF_HEADER,
    ERR_HEADER, OK_HEADER,
};
use super::packet::Packet;
use crate::config::TlsMode;
use crate::error::{MySqlError, MySqlResult};

/// Handshake inputs, derived from the connection config.
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    pub username: String,
    pub password: Vec<u8>,
    pub database: Option<String>,
    pub tls_mode: TlsMode,
    /// The transport is already private (e.g. a Unix socket).
    pub secure_transport: bool,
    pub charset: u8,
    pub max_packet_size: u32,
    pub attributes: Vec<(String, String)>,
    pub capabilities: CapabilityFlags,
}

/// What the server told us about the established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub connection_id: u32,
    pub server_version: String,
    pub capabilities: CapabilityFlags,
    pub status: StatusFlags,
}

/// Lifecycle states.
#[derive(Debug)]
pub enum Lifecycle {
    Start,
    AwaitingGreeting,
    WaitingForTls {
        greeting: Greeting,
        capabilities: CapabilityFlags,
    },
    Authenticating {
        auth: AuthState,
        session: SessionInfo,
    },
    /// Command phase.
    Ready { capabilities: CapabilityFlags },
    Closed,
}

/// Inputs to the state machine.
#[derive(Debug)]
pub enum Event {
    TransportActive,
    Packet(Packet),
    TlsEstablished,
    Close,
    TransportClosed,
    Error(MySqlError),
}

/// Side effects requested by a transition.
#[derive(Debug)]
pub enum Action {
    /// Wait for the next inbound packet.
    Read,
    /// Frame and write a payload. `resequence` resets the sequence counter first.
    Send { payload: BytesMut, resequence: bool },
    /// Wrap the transport in TLS, then deliver [`Event::TlsEstablished`].
    StartTls,
    /// Authentication finished; commands may flow.
    Established(SessionInfo),
    /// Shut the transport down.
    Shutdown,
    /// The connection is dead; fail establishment and every queued command.
    Fail(MySqlError),
}

impl Action {
    fn send(payload: impl Into<BytesMut>) -> Self {
        Action::Send {
            payload: payload.into(),
            resequence: false,
        }
    }
}

type Transition = (Lifecycle, Vec<Action>);

fn fail(err: MySqlError) -> Transition {
    debug!(error = %err, "connection lifecycle failed");
    (Lifecycle::Closed, vec![Action::Fail(err)])
}

impl Lifecycle {
    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Start => "start",
            Lifecycle::AwaitingGreeting => "awaiting_greeting",
            Lifecycle::WaitingForTls { .. } => "waiting_for_tls",
            Lifecycle::Authenticating { .. } => "authenticating",
            Lifecycle::Ready { .. } => "ready",
            Lifecycle::Closed => "closed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Lifecycle::Ready { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Lifecycle::Closed)
    }

    /// Negotiated capabilities once in the command phase.
    pub fn capabilities(&self) -> Option<CapabilityFlags> {
        match self {
            Lifecycle::Ready { capabilities } => Some(*capabilities),
            _ => None,
        }
    }

    /// Advance the machine by one event.
    pub fn on_event(self, event: Event, params: &HandshakeParams) -> Transition {
        match (self, event) {
            (Lifecycle::Closed, _) => (Lifecycle::Closed, Vec::new()),
            (_, Event::Error(err)) => fail(err),
            (_, Event::TransportClosed) => fail(MySqlError::Closed),

            (Lifecycle::Start, Event::TransportActive) => {
                (Lifecycle::AwaitingGreeting, vec![Action::Read])
            }
            (Lifecycle::AwaitingGreeting, Event::Packet(packet)) => on_greeting(&packet, params)
                .unwrap_or_else(fail),
            (Lifecycle::WaitingForTls { greeting, capabilities }, Event::TlsEstablished) => {
                debug!("TLS established, continuing handshake");
                send_handshake_response(&greeting, capabilities, true, params).unwrap_or_else(fail)
            }
            (Lifecycle::Authenticating { auth, session }, Event::Packet(packet)) => {
                on_auth_packet(auth, session, &packet).unwrap_or_else(fail)
            }
            (Lifecycle::Ready { .. }, Event::Close) => (
                Lifecycle::Closed,
                vec![
                    Action::Send {
                        payload: encode_quit(),
                        resequence: true,
                    },
                    Action::Shutdown,
                ],
            ),
            (_, Event::Close) => (Lifecycle::Closed, vec![Action::Shutdown, Action::Fail(MySqlError::Closed)]),
            (state, event) => fail(MySqlError::Protocol(format!(
                "unexpected {} in state {}",
                event_name(&event),
                state.name()
            ))),
        }
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::TransportActive => "transport activation",
        Event::Packet(_) => "packet",
        Event::TlsEstablished => "TLS completion",
        Event::Close => "close",
        Event::TransportClosed => "transport close",
        Event::Error(_) => "error",
    }
}

fn on_greeting(packet: &Packet, params: &HandshakeParams) -> MySqlResult<Transition> {
    if packet.is_err() {
        return Err(parse_err(&packet.payload, CapabilityFlags::PROTOCOL_41)?.into_error());
    }
    let greeting = Greeting::parse(&packet.payload)?;
    debug!(
        server_version = %greeting.server_version,
        connection_id = greeting.connection_id,
        plugin = %greeting.auth_plugin_name,
        "received server greeting"
    );

    match greeting.version() {
        Some(version) if version.is_supported() => {}
        _ => warn!(
            server_version = %greeting.server_version,
            "server version is not a tested MySQL/MariaDB release"
        ),
    }

    let offered = greeting.capabilities;
    if !offered.contains(CapabilityFlags::REQUIRED) {
        return Err(MySqlError::UnsupportedServer(format!(
            "server {} lacks CLIENT_PROTOCOL_41 or CLIENT_SECURE_CONNECTION",
            greeting.server_version
        )));
    }

    let mut capabilities = params.capabilities & offered;
    match params.tls_mode {
        TlsMode::Disable => capabilities.remove(CapabilityFlags::SSL),
        TlsMode::Prefer => {}
        TlsMode::Require if !capabilities.contains(CapabilityFlags::SSL) => {
            return Err(MySqlError::SecureConnectionRequired);
        }
        TlsMode::Require => {}
    }
    debug!(?capabilities, "negotiated capabilities");

    if capabilities.contains(CapabilityFlags::SSL) {
        let request = encode_ssl_request(capabilities, params.max_packet_size, params.charset);
        return Ok((
            Lifecycle::WaitingForTls {
                greeting,
                capabilities,
            },
            vec![Action::send(request), Action::StartTls],
        ));
    }

    send_handshake_response(&greeting, capabilities, params.secure_transport, params)
}

fn send_handshake_response(
    greeting: &Greeting,
    capabilities: CapabilityFlags,
    secure: bool,
    params: &HandshakeParams,
) -> MySqlResult<Transition> {
    let plugin_name = if greeting.auth_plugin_name.is_empty() {
        MYSQL_NATIVE_PASSWORD
    } else {
        greeting.auth_plugin_name.as_str()
    };
    let (auth, auth_response) =
        AuthState::start(plugin_name, &params.password, &greeting.auth_plugin_data, secure)?;

    let response = HandshakeResponse {
        capabilities,
        max_packet_size: params.max_packet_size,
        charset: params.charset,
        username: &params.username,
        auth_response: &auth_response,
        database: params.database.as_deref(),
        auth_plugin: auth.plugin().name(),
        attributes: &params.attributes,
    }
    .encode();

    let session = SessionInfo {
        connection_id: greeting.connection_id,
        server_version: greeting.server_version.clone(),
        capabilities,
        status: greeting.status_flags,
    };
    Ok((
        Lifecycle::Authenticating { auth, session },
        vec![Action::send(response), Action::Read],
    ))
}

fn on_auth_packet(
    mut auth: AuthState,
    mut session: SessionInfo,
    packet: &Packet,
) -> MySqlResult<Transition> {
    let payload = &packet.payload[..];
    match packet.header() {
        Some(OK_HEADER) => {
            debug!(plugin = auth.plugin().name(), "authenticated");
            if let Ok(ok) = OkPacket::parse(payload, session.capabilities) {
                session.status = ok.status;
            }
            let capabilities = session.capabilities;
            Ok((
                Lifecycle::Ready { capabilities },
                vec![Action::Established(session)],
            ))
        }
        Some(ERR_HEADER) => Err(parse_err(payload, session.capabilities)?.into_error()),
        Some(EOF_HEADER) => {
            let switch = AuthSwitchRequest::parse(payload)?;
            let response = auth.switch(&switch.plugin_name, &switch.seed)?;
            Ok((
                Lifecycle::Authenticating { auth, session },
                vec![Action::send(&response[..]), Action::Read],
            ))
        }
        Some(AUTH_MORE_DATA_HEADER) => {
            let mut actions = Vec::new();
            if let Some(reply) = auth.more_data(&payload[1..])? {
                actions.push(Action::send(&reply[..]));
            }
            actions.push(Action::Read);
            Ok((Lifecycle::Authenticating { auth, session }, actions))
        }
        Some(other) => Err(MySqlError::Protocol(format!(
            "unexpected packet 0x{:02x} during authentication",
            other
        ))),
        None => Err(MySqlError::Protocol("empty packet during authentication".into())),
    }
}
