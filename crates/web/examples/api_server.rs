use http::StatusCode;

use ferry_web::router::{get, Router};
use ferry_web::{Endpoint, HttpRequest, HttpResponse, HttpService, Server};

fn hello(_req: &HttpRequest, resp: &mut HttpResponse) -> StatusCode {
    resp.text("hello world\r\n");
    StatusCode::OK
}

fn greet(req: &HttpRequest, resp: &mut HttpResponse) -> StatusCode {
    match req.param("name") {
        Some(name) => {
            resp.text(format!("hello, {name}\r\n"));
            StatusCode::OK
        }
        None => StatusCode::BAD_REQUEST,
    }
}

#[tokio::main]
async fn main() {
    let router = Router::builder()
        .route("/hello", get(Endpoint::sync(hello)))
        .route("/greet/{name}", get(Endpoint::sync(greet)))
        .build();

    let service = HttpService::builder()
        .router(router)
        .proxy_pass("/backend/", "http://127.0.0.1:9000/")
        .build();

    Server::builder().address("127.0.0.1:8080").service(service).build().unwrap().start().await;
}
