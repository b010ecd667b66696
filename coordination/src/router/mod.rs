//! Routing: persona detection and execution path classification

pub mod brain;
pub mod classifier;

pub use brain::{capabilities, ContextType, Persona, PersonaCapabilities, RoutingBrain, RoutingContext};
pub use classifier::{estimate_cost, requires_online, select_connector, Connector, ONLINE_KEYWORDS};
