//! `hearth classify`: print the router's decision for a request.

pub fn run(text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let decision = hearth_agent::classify(text);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
