use super::*;

pub(super) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .fallback(handle_request)
        .with_state(state)
}

/// Every request, whatever its shape, gets an envelope back. The dispatch
/// runs in its own task so a panic there surfaces as a `JoinError` here.
async fn handle_request(State(state): State<AppState>, uri: Uri, body: Bytes) -> Json<Envelope> {
    let request = wire::decode_request(&body, uri.path());
    let endpoint = request.endpoint.clone();
    let worker = state.clone();
    let result = match tokio::spawn(async move { dispatch(&worker, request).await }).await {
        Ok(result) => result,
        Err(join) if join.is_panic() => {
            let message = scheduler::panic_message(join.into_panic().as_ref());
            error!("handler for '{endpoint}' panicked: {message}");
            OperationResult::fail(format!("Handler panicked: {message}"))
        }
        Err(join) => OperationResult::fail(format!("Handler was cancelled: {join}")),
    };
    Json(aggregator::build_envelope(result, state.logs.drain()))
}

pub(super) async fn dispatch(state: &AppState, request: types::Request) -> OperationResult {
    if let Err(blocked) = state.build.check() {
        return blocked.into();
    }
    let prepared = match handlers::lookup(&request.endpoint)
        .and_then(|handler| handler(&request.params, &state.config))
    {
        Ok(prepared) => prepared,
        Err(err) => return err.into(),
    };
    debug!(endpoint = %request.endpoint, access = ?prepared.access, "dispatching");
    state.scheduler.execute(prepared.access, prepared.op).await
}
