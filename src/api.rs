use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, info};

use crate::analytics::{
    model_performance_table, predict_returns, ModelPerformance, NewRiskMetrics,
    OptimizationOutcome, OptimizationRequest, OptimizationResult, PredictionRequest,
    PredictionResponse, RiskMetrics, TrainingRequest, TrainingResponse,
};
use crate::error::Error;
use crate::instrument::{Instrument, InstrumentPatch, NewInstrument};
use crate::portfolio::{Holding, NewHolding, NewPortfolio, Portfolio, PortfolioPatch, PortfolioView};
use crate::server::SharedServerState;
use crate::user::User;

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::invalid("body", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{entity} {id} not found") })),
            )
                .into_response(),
            Error::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request", "fields": fields })),
            )
                .into_response(),
            other => {
                error!("Request failed : {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    Ok(payload?.0)
}

pub fn routes() -> Router<SharedServerState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/portfolios", get(list_user_portfolios))
        .route("/api/portfolios", post(create_portfolio))
        .route(
            "/api/portfolios/{id}",
            get(get_portfolio)
                .patch(update_portfolio)
                .delete(delete_portfolio),
        )
        .route(
            "/api/portfolios/{id}/holdings",
            get(list_holdings).post(create_holding),
        )
        .route(
            "/api/portfolios/{id}/risk-metrics",
            get(get_risk_metrics).put(put_risk_metrics),
        )
        .route("/api/portfolios/{id}/optimizations", get(list_optimizations))
        .route("/api/stocks", get(list_stocks).post(create_stock))
        .route(
            "/api/stocks/{symbol}",
            get(get_stock).patch(update_stock),
        )
        .route("/api/ml-models/performance", get(model_performance))
        .route("/api/train-models", post(train_models))
        .route("/api/optimize", post(optimize))
        .route("/api/predict-returns", post(predict))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "portfolio-dashboard" }))
}

async fn get_user(State(state): State<SharedServerState>, Path(id): Path<u64>) -> ApiResult<User> {
    let store = state.store.read().await;
    let user = store.get_user(id).ok_or_else(|| Error::not_found("user", id))?;
    Ok(Json(user))
}

async fn list_user_portfolios(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
) -> ApiResult<Vec<Portfolio>> {
    let store = state.store.read().await;
    Ok(Json(store.portfolios_by_user(id)))
}

async fn create_portfolio(
    State(state): State<SharedServerState>,
    payload: Result<Json<NewPortfolio>, JsonRejection>,
) -> Result<(StatusCode, Json<Portfolio>), ApiError> {
    let portfolio = body(payload)?;
    let portfolio = state.store.write().await.insert_portfolio(portfolio)?;
    info!("Created portfolio {} for user {}", portfolio.id, portfolio.user_id);
    Ok((StatusCode::CREATED, Json(portfolio)))
}

async fn get_portfolio(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
) -> ApiResult<PortfolioView> {
    let snapshot = state
        .store
        .write()
        .await
        .revalue_portfolio(id)
        .ok_or_else(|| Error::not_found("portfolio", id))?;
    Ok(Json(snapshot.portfolio))
}

async fn update_portfolio(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
    payload: Result<Json<PortfolioPatch>, JsonRejection>,
) -> ApiResult<Portfolio> {
    let patch = body(payload)?;
    patch.validate()?;
    Ok(Json(state.store.write().await.update_portfolio(id, patch)?))
}

async fn delete_portfolio(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.store.write().await.delete_portfolio(id)?;
    info!("Deleted portfolio {id}");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_holdings(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
) -> ApiResult<Vec<Holding>> {
    let store = state.store.read().await;
    if store.get_portfolio(id).is_none() {
        return Err(Error::not_found("portfolio", id).into());
    }
    Ok(Json(store.holdings_of(id)))
}

async fn create_holding(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
    payload: Result<Json<NewHolding>, JsonRejection>,
) -> Result<(StatusCode, Json<Holding>), ApiError> {
    let holding = body(payload)?;
    let holding = state.store.write().await.insert_holding(id, holding)?;
    Ok((StatusCode::CREATED, Json(holding)))
}

async fn get_risk_metrics(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
) -> ApiResult<RiskMetrics> {
    let store = state.store.read().await;
    let metrics = store
        .risk_metrics_of(id)
        .ok_or_else(|| Error::not_found("risk metrics", id))?;
    Ok(Json(metrics))
}

async fn put_risk_metrics(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
    payload: Result<Json<NewRiskMetrics>, JsonRejection>,
) -> ApiResult<RiskMetrics> {
    let metrics = body(payload)?;
    Ok(Json(state.store.write().await.upsert_risk_metrics(id, metrics)?))
}

async fn list_optimizations(
    State(state): State<SharedServerState>,
    Path(id): Path<u64>,
) -> ApiResult<Vec<OptimizationResult>> {
    Ok(Json(state.store.read().await.optimizations_of(id)))
}

async fn list_stocks(State(state): State<SharedServerState>) -> ApiResult<Vec<Instrument>> {
    Ok(Json(state.store.read().await.list_instruments()))
}

async fn create_stock(
    State(state): State<SharedServerState>,
    payload: Result<Json<NewInstrument>, JsonRejection>,
) -> Result<(StatusCode, Json<Instrument>), ApiError> {
    let instrument = body(payload)?;
    let instrument = state.store.write().await.insert_instrument(instrument)?;
    Ok((StatusCode::CREATED, Json(instrument)))
}

async fn get_stock(
    State(state): State<SharedServerState>,
    Path(symbol): Path<String>,
) -> ApiResult<Instrument> {
    let store = state.store.read().await;
    let instrument = store
        .get_instrument(&symbol)
        .ok_or_else(|| Error::not_found("instrument", &symbol))?;
    Ok(Json(instrument))
}

async fn update_stock(
    State(state): State<SharedServerState>,
    Path(symbol): Path<String>,
    payload: Result<Json<InstrumentPatch>, JsonRejection>,
) -> ApiResult<Instrument> {
    let patch = body(payload)?;
    patch.validate()?;
    Ok(Json(state.store.write().await.update_instrument(&symbol, patch)?))
}

async fn model_performance(
    State(state): State<SharedServerState>,
) -> ApiResult<Vec<ModelPerformance>> {
    Ok(Json(state.store.read().await.list_model_performance()))
}

async fn train_models(
    State(state): State<SharedServerState>,
    payload: Result<Json<TrainingRequest>, JsonRejection>,
) -> ApiResult<TrainingResponse> {
    let request = body(payload)?;
    request.validate()?;

    let results: Vec<ModelPerformance> = {
        let mut store = state.store.write().await;
        model_performance_table()
            .into_iter()
            .map(|record| store.record_model_performance(record))
            .collect()
    };
    info!(
        "Trained {} models on {}",
        results.len(),
        request.symbols.join(",")
    );

    Ok(Json(TrainingResponse {
        status: "success".to_string(),
        results,
        timestamp: Utc::now(),
    }))
}

async fn optimize(
    State(state): State<SharedServerState>,
    payload: Result<Json<OptimizationRequest>, JsonRejection>,
) -> ApiResult<OptimizationOutcome> {
    let request = body(payload)?;
    request.validate()?;
    let outcome = request.parameters.risk_tolerance.outcome();

    if let Some(portfolio_id) = request.portfolio_id {
        let result = state.store.write().await.record_optimization(
            portfolio_id,
            &request.algorithm,
            request.parameters.clone(),
            outcome.allocation.clone(),
        )?;
        info!(
            "Recorded {} optimization {} for portfolio {portfolio_id}",
            result.algorithm, result.id
        );
    }

    Ok(Json(outcome))
}

async fn predict(
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> ApiResult<PredictionResponse> {
    let request = body(payload)?;
    request.validate()?;
    Ok(Json(predict_returns(&request)))
}
