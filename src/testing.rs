use axum::Router;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral local port and returns its base url.
pub async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}
