use ferry_web::{HttpService, Server};

#[tokio::main]
async fn main() {
    let service = HttpService::builder()
        .document_root("./public")
        .index_file("index.html")
        .error_page("404.html")
        .limit_rate(512)
        .build();

    Server::builder().address("127.0.0.1:8080").service(service).build().unwrap().start().await;
}
