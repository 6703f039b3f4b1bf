pub mod applications;
pub mod audit;
pub mod budget;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod routes;

pub use routes::create_router;
