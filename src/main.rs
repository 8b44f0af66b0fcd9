#[tokio::main]
async fn main() {
    sidepilot_lib::run().await
}
