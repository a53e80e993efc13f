//! Scenarios spanning the common models, the reconcilers and the zone
//! pipeline. Everything here runs against in-process fakes.

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod controller_loop;
#[cfg(test)]
mod firewall;
#[cfg(test)]
mod zone_pipeline;
