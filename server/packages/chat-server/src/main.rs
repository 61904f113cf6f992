fn main() {
    if let Err(err) = research_chat::cli::run_research_chat() {
        eprintln!("research-chat: {err}");
        std::process::exit(1);
    }
}
