//! Client-facing service layer.

pub mod api;
mod order_service;

pub use api::{OrderView, Request, Response, SubmitOrderRequest, SubmitOrderResponse};
pub use order_service::OrderService;
