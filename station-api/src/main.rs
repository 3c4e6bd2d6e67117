fn main() {
    if let Err(err) = station_feed::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
