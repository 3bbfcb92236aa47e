pub mod chart_spec;
pub mod chat_session;
pub mod column_roles;
pub mod config;
pub mod connection_manager;
pub mod local_store;
pub mod outbound_queue;
pub mod protocol;
pub mod reconnect_policy;
pub mod settings;
pub mod tabular;
pub mod visualization;
