pub mod datetime;
pub mod executor;
pub mod geocode;
pub mod lenient;
pub mod registry;
pub mod save_event;
pub mod schema;
pub mod types;
pub mod weather;

pub use datetime::CurrentDateTimeTool;
pub use executor::ToolExecutor;
pub use geocode::GeocodeTool;
pub use registry::{Tool, ToolRegistry};
pub use save_event::SaveEventTool;
pub use schema::parameters_for;
pub use types::{ToolContext, ToolResult};
pub use weather::FetchWeatherTool;
