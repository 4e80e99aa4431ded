use mortgage_router_api::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("mortgage router error: {err}");
        std::process::exit(1);
    }
}
