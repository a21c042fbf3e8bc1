// openweather_exporter - Prometheus metrics exporter for the OpenWeather API
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::Fetcher;
use crate::metrics::{encode_text, WeatherCollector};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const OPENMETRICS_TEXT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// State shared by every request to the metrics endpoint.
#[derive(Debug)]
pub struct RequestContext<F> {
    collector: WeatherCollector<F>,
}

impl<F> RequestContext<F> {
    pub fn new(collector: WeatherCollector<F>) -> Self {
        RequestContext { collector }
    }
}

/// Router exposing `GET /metrics`.
pub fn app<F>(context: Arc<RequestContext<F>>) -> Router
where
    F: Fetcher + 'static,
{
    Router::new()
        .route("/metrics", get(text_metrics::<F>))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics<F>(State(context): State<Arc<RequestContext<F>>>) -> Response
where
    F: Fetcher + 'static,
{
    let samples = context.collector.collect().await;

    match encode_text(context.collector.describe(), &samples) {
        Ok(buf) => {
            tracing::debug!(
                message = "encoded metrics to text format",
                num_samples = samples.len(),
                num_bytes = buf.len(),
            );

            ([(CONTENT_TYPE, OPENMETRICS_TEXT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
