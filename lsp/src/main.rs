#[tokio::main]
async fn main() {
    lazen_lsp::run().await;
}
