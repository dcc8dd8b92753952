// Domain layer: interface declarations, resources and the ports adapters implement.

pub mod model;
pub mod ports;
pub mod table;
