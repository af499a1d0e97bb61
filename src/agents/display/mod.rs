//! Display 能力：模板显示、关闭、元素选择与自动消失

pub mod agent;
pub mod payload;

pub use agent::DisplayAgent;
pub use payload::TEMPLATE_NAMES;
