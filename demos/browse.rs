use futures_util::StreamExt;
use mdns_client::{Client, Question, QueryOptions, Type};

#[tokio::main]
pub async fn main() {
    env_logger::init();

    let (client, task) = Client::with_default_handle().unwrap();
    tokio::spawn(task);

    let stream = client
        .query(
            vec![Question::new("_http._tcp.local", Type::PTR)],
            QueryOptions::default(),
        )
        .unwrap();
    futures_util::pin_mut!(stream);

    while let Some(response) = stream.next().await {
        println!(
            "[{:?} ifindex {}] {} answers",
            response.family,
            response.ifindex,
            response.packet.answers.len()
        );
        for answer in &response.packet.answers {
            println!("  {} {:?}", answer.name, answer.data);
        }
    }
}
