mod support;

mod lifecycle;
mod query;
mod resize;
