use std::sync::Arc;

use arrow_fetch::stats::StatsRecorder;

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    let recorder = StatsRecorder::new();

    let client = arrow_fetch::ClientBuilder::new().build().unwrap();
    let table = client
        .get("http://localhost:8000")
        .recorder(Arc::new(recorder.clone()))
        .send()
        .await
        .unwrap()
        .arrow_table()
        .await
        .unwrap();

    println!("schema: {:?}", table.schema());
    println!("{} batches, {} rows", table.num_batches(), table.num_rows());
    println!("{}", recorder.finish())
}
