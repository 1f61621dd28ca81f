//! Endpoint registrations and live routes of the relay.
//!
//! The registry only decides; it never touches a socket. Every frame a
//! client sends is turned into a list of [`Delivery`]s for the connection
//! handlers to write out.

use std::collections::HashMap;
use std::fmt::Display;

use tracing::debug;
use tracing::info;

use super::frame::RelayFrame;
use crate::models::endpoint::EndpointId;
use crate::transport::ConnectionId;

/// Relay-local handle of one client link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

pub type Delivery = (ClientId, RelayFrame);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    dialer: ClientId,
    listener: ClientId,
    open: bool,
}

impl Route {
    fn other_end(&self, client: ClientId) -> Option<ClientId> {
        if client == self.dialer {
            Some(self.listener)
        } else if client == self.listener {
            Some(self.dialer)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    endpoints: HashMap<EndpointId, ClientId>,
    registrations: HashMap<ClientId, EndpointId>,
    routes: HashMap<ConnectionId, Route>,
}

impl Registry {
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_registered(&self, endpoint: &EndpointId) -> bool {
        self.endpoints.contains_key(endpoint)
    }

    pub fn handle(&mut self, client: ClientId, frame: RelayFrame) -> Vec<Delivery> {
        debug!("{client} sent {}", frame.get_type());
        match frame {
            RelayFrame::Register { endpoint } => self.register(client, endpoint),
            RelayFrame::Unregister => {
                self.unregister(client);
                vec![]
            }
            RelayFrame::Dial { conn, target } => self.dial(client, conn, target),
            RelayFrame::Accept { conn } => self.accept(client, conn),
            RelayFrame::Data { conn, payload } => match self.open_route_peer(client, conn) {
                Some(peer) => vec![(peer, RelayFrame::Data { conn, payload })],
                None => {
                    debug!("Dropping data from {client} on unknown connection {conn}");
                    vec![]
                }
            },
            RelayFrame::Close { conn } => self.close(client, conn),
            other => vec![(
                client,
                RelayFrame::Error {
                    reason: format!("unexpected {} frame", other.get_type()),
                },
            )],
        }
    }

    /// Forget a client that went away, closing every route it was part of.
    pub fn remove_client(&mut self, client: ClientId) -> Vec<Delivery> {
        self.unregister(client);

        let conns: Vec<ConnectionId> = self
            .routes
            .iter()
            .filter(|(_, route)| route.other_end(client).is_some())
            .map(|(conn, _)| *conn)
            .collect();

        conns
            .into_iter()
            .filter_map(|conn| self.close(client, conn).pop())
            .collect()
    }

    fn register(&mut self, client: ClientId, endpoint: EndpointId) -> Vec<Delivery> {
        match self.endpoints.get(&endpoint) {
            Some(owner) if *owner == client => {
                return vec![(client, RelayFrame::Registered { endpoint })];
            }
            Some(_) => {
                info!("Refusing registration of {endpoint} by {client}: taken");
                return vec![(client, RelayFrame::EndpointTaken { endpoint })];
            }
            None => (),
        }

        self.unregister(client);
        info!("{client} registered as {endpoint}");
        self.endpoints.insert(endpoint.clone(), client);
        self.registrations.insert(client, endpoint.clone());

        vec![(client, RelayFrame::Registered { endpoint })]
    }

    fn unregister(&mut self, client: ClientId) {
        if let Some(endpoint) = self.registrations.remove(&client) {
            info!("{client} released {endpoint}");
            self.endpoints.remove(&endpoint);
        }
    }

    fn dial(&mut self, client: ClientId, conn: ConnectionId, target: EndpointId) -> Vec<Delivery> {
        let Some(from) = self.registrations.get(&client).cloned() else {
            return vec![
                (
                    client,
                    RelayFrame::Error {
                        reason: "register before dialling".to_owned(),
                    },
                ),
                (client, RelayFrame::Close { conn }),
            ];
        };

        if self.routes.contains_key(&conn) {
            debug!("{client} reused connection id {conn}");
            return vec![(client, RelayFrame::Close { conn })];
        }

        let listener = match self.endpoints.get(&target) {
            Some(listener) if *listener == client => {
                return vec![(client, RelayFrame::Close { conn })];
            }
            Some(listener) => *listener,
            None => {
                info!("{from} dialled unknown endpoint {target}");
                return vec![(client, RelayFrame::PeerUnavailable { conn, target })];
            }
        };

        info!("Routing {conn}: {from} -> {target}");
        self.routes.insert(
            conn,
            Route {
                dialer: client,
                listener,
                open: false,
            },
        );

        vec![(listener, RelayFrame::Incoming { conn, from })]
    }

    fn accept(&mut self, client: ClientId, conn: ConnectionId) -> Vec<Delivery> {
        match self.routes.get_mut(&conn) {
            Some(route) if route.listener == client && !route.open => {
                route.open = true;
                debug!("Connection {conn} is open");
                vec![
                    (route.dialer, RelayFrame::Open { conn }),
                    (route.listener, RelayFrame::Open { conn }),
                ]
            }
            _ => {
                debug!("Ignoring accept of {conn} from {client}");
                vec![]
            }
        }
    }

    fn close(&mut self, client: ClientId, conn: ConnectionId) -> Vec<Delivery> {
        let Some(peer) = self
            .routes
            .get(&conn)
            .and_then(|route| route.other_end(client))
        else {
            return vec![];
        };

        self.routes.remove(&conn);
        debug!("Connection {conn} closed by {client}");

        vec![(peer, RelayFrame::Close { conn })]
    }

    fn open_route_peer(&self, client: ClientId, conn: ConnectionId) -> Option<ClientId> {
        self.routes
            .get(&conn)
            .filter(|route| route.open)
            .and_then(|route| route.other_end(client))
    }
}
