//! `OpenAPI` documentation for the REST API.

// The OpenApi derive macro generates code that triggers this lint
#![allow(clippy::needless_for_each)]

use utoipa::OpenApi;

use crate::app::HealthResponse;
use crate::http::ErrorResponse;
use crate::keys::{KeyRequest, KeyResponse};
use crate::metrics::handlers::{
    EventsResponse, IngestResponse, LoginRequest, LoginResponse, MeResponse, MetricIngestRequest,
};
use crate::metrics::store::{
    InterfaceStats, MetricsOverview, OverviewMeta, PublicEvent, SourceStats, TimelineBucket,
    Totals,
};
use crate::notion::{ExchangeRequest, FinalizeRequest};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Isla Reader Server",
        version = "0.1.0",
        description = "Key issuance, Notion OAuth relay and usage metrics for the Isla Reader app",
        license(name = "MIT")
    ),
    paths(
        crate::app::health_check,
        crate::keys::issue_key,
        crate::notion::handlers::notion_callback,
        crate::notion::handlers::finalize,
        crate::notion::handlers::exchange,
        crate::metrics::handlers::ingest,
        crate::metrics::handlers::login,
        crate::metrics::handlers::logout,
        crate::metrics::handlers::me,
        crate::metrics::handlers::data,
        crate::metrics::handlers::events,
        crate::metrics::handlers::export,
    ),
    components(schemas(
        ErrorResponse,
        HealthResponse,
        KeyRequest,
        KeyResponse,
        FinalizeRequest,
        ExchangeRequest,
        MetricIngestRequest,
        IngestResponse,
        LoginRequest,
        LoginResponse,
        MeResponse,
        EventsResponse,
        MetricsOverview,
        Totals,
        InterfaceStats,
        SourceStats,
        TimelineBucket,
        OverviewMeta,
        PublicEvent,
    ))
)]
pub struct ApiDoc;
