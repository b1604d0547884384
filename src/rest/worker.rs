// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

use crate::{
    db::Store,
    external::EpochService,
    oracle::{Intake, Submission},
    Error, ErrorKind, Result, VERSION,
};
use async_std::task;
use serde::Serialize;
use std::sync::Arc;
use tide::{http::mime, Request, Response, StatusCode};

type State<S, E> = Arc<Intake<S, E>>;

/// Conversion from "core" errors to HTTP errors.
impl From<ErrorKind> for StatusCode {
    fn from(err: ErrorKind) -> StatusCode {
        use crate::error::ErrorKind::*;
        match err {
            MalformedData | ExpiredDeadline => StatusCode::BadRequest,
            BadNetwork => StatusCode::BadGateway,
            Timeout => StatusCode::GatewayTimeout,
            InvalidSignature => StatusCode::Unauthorized,
            DuplicatedResult | AlreadyResolved => StatusCode::Conflict,
            ResourceNotFound => StatusCode::NotFound,
            DatabaseFault | SandboxFault => StatusCode::InternalServerError,
            ProgramFault => StatusCode::UnprocessableEntity,
            NotImplemented => StatusCode::NotImplemented,
            Other => StatusCode::ImATeapot,
        }
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        let status: StatusCode = err.kind.into();
        let body = serde_json::to_string(&err).unwrap_or_default();
        Response::builder(status)
            .body(body)
            .content_type(mime::JSON)
            .build()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct SubmitResponse {
    id: u64,
}

fn json_result<T: Serialize>(result: Result<T>) -> tide::Result {
    let response = match result {
        Ok(value) => Response::builder(StatusCode::Ok)
            .body(serde_json::to_string(&value)?)
            .content_type(mime::JSON)
            .build(),
        Err(err) => {
            debug!("request refused: {}", err.to_string_full());
            err.into()
        }
    };
    Ok(response)
}

async fn submit_request<S: Store, E: EpochService>(
    mut req: Request<State<S, E>>,
) -> tide::Result {
    let submission: Submission = match req.body_json().await {
        Ok(submission) => submission,
        Err(err) => {
            let err = Error::new_ext(ErrorKind::MalformedData, err.to_string());
            return json_result::<SubmitResponse>(Err(err));
        }
    };
    let intake = Arc::clone(req.state());
    let res = task::spawn_blocking(move || intake.submit(submission)).await;
    json_result(res.map(|id| SubmitResponse { id }))
}

async fn get_request<S: Store, E: EpochService>(req: Request<State<S, E>>) -> tide::Result {
    let id = match req.param("0").unwrap_or_default().parse::<u64>() {
        Ok(id) => id,
        Err(err) => {
            let err = Error::new_ext(ErrorKind::MalformedData, err);
            return json_result::<()>(Err(err));
        }
    };
    let intake = Arc::clone(req.state());
    let res = task::spawn_blocking(move || intake.status(id)).await;
    json_result(res)
}

async fn get_index<S: Store, E: EpochService>(_req: Request<State<S, E>>) -> tide::Result {
    Ok(format!("TRINCI Oracle v{}", VERSION).into())
}

pub fn run<S: Store, E: EpochService>(addr: String, port: u16, intake: State<S, E>) {
    let mut app = tide::with_state(intake);

    app.at("/api/v1/request").post(submit_request::<S, E>);
    app.at("/api/v1/request/:0").get(get_request::<S, E>);
    app.at("/").get(get_index::<S, E>);

    let fut = app.listen((addr, port));
    if let Err(err) = task::block_on(fut) {
        error!("REST listener failure: {}", err);
    }
}
