// src/core/topic_views/mod.rs

//! Topic view specifications: mapping rules that derive view topics from
//! source topics, and the server-held view records built from them.

pub mod spec;
pub mod view;

pub use spec::TopicViewSpec;
pub use view::TopicView;
