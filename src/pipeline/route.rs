//! Route resolver — picks the outbound line for the relay channel.
//!
//! Total function: every combination of mode, inbound route and available
//! routes resolves to a route or the system-default sentinel.

use tracing::{debug, warn};

use crate::pipeline::types::{OutboundRoute, RouteId};
use crate::settings::RouteSelectionMode;

/// Resolved route plus an optional user-facing warning about degradation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResolution {
    pub route: OutboundRoute,
    pub warning: Option<String>,
}

impl RouteResolution {
    fn route(id: RouteId) -> Self {
        Self {
            route: OutboundRoute::Specific(id),
            warning: None,
        }
    }

    fn system_default() -> Self {
        Self {
            route: OutboundRoute::SystemDefault,
            warning: None,
        }
    }
}

/// Resolve the relay route. Evaluated on every dispatch; never cached.
pub fn resolve_route(
    mode: RouteSelectionMode,
    inbound: Option<&RouteId>,
    available: &[RouteId],
) -> RouteResolution {
    match mode {
        RouteSelectionMode::SameAsInbound => match inbound {
            Some(id) => RouteResolution::route(id.clone()),
            None => {
                debug!("Inbound route unknown, using system default");
                RouteResolution::system_default()
            }
        },
        RouteSelectionMode::AlwaysRouteA => match available.first() {
            Some(id) => RouteResolution::route(id.clone()),
            None => {
                warn!("Route A requested but no routes available, using system default");
                RouteResolution {
                    route: OutboundRoute::SystemDefault,
                    warning: Some("No SIM available for route 1; sending via system default".into()),
                }
            }
        },
        RouteSelectionMode::AlwaysRouteB => {
            if let Some(id) = available.get(1) {
                return RouteResolution::route(id.clone());
            }
            warn!(available = available.len(), "Route B not available, falling back to route A");
            if let Some(id) = available.first() {
                return RouteResolution::route(id.clone());
            }
            warn!("Route A not available either, using system default");
            RouteResolution {
                route: OutboundRoute::SystemDefault,
                warning: Some("No SIM available for route 2; sending via system default".into()),
            }
        }
    }
}
