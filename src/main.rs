fn main() {
    if let Err(e) = cluster_forward_lib::run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
