//! Cloud-Functions-style trigger dispatch over the change stream.

mod dispatcher;
mod routes;

pub use crate::{
    dispatcher::{
        ReportStream,
        TriggerDispatcher,
        TriggerEvent,
        TriggerHandler,
        TriggerKind,
        TriggerReport,
    },
    routes::RouteTemplate,
};
