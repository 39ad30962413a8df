//! Pages for logged-in users. Only the data a view needs is returned; layout
//! belongs to whatever renders it.
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::{
    auth::{extractors::CurrentUser, Principal},
    state::AppState,
};

pub const PAGES: [&str; 5] = [
    "dashboard",
    "git-tutorial",
    "jenkins-tutorial",
    "shell-tutorial",
    "python-tutorial",
];

#[derive(Debug, Serialize)]
pub struct PageView {
    pub page: &'static str,
    pub user: Principal,
}

fn view(page: &'static str, CurrentUser(user): CurrentUser) -> Json<PageView> {
    Json(PageView { page, user })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(|u: CurrentUser| async move { view(PAGES[0], u) }))
        .route("/git-tutorial", get(|u: CurrentUser| async move { view(PAGES[1], u) }))
        .route("/jenkins-tutorial", get(|u: CurrentUser| async move { view(PAGES[2], u) }))
        .route("/shell-tutorial", get(|u: CurrentUser| async move { view(PAGES[3], u) }))
        .route("/python-tutorial", get(|u: CurrentUser| async move { view(PAGES[4], u) }))
}
