pub mod controller;
pub mod reconcile;

pub use controller::run;
pub use reconcile::reconcile_topology;
