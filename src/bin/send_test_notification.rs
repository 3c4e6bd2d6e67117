fn main() {
    if let Err(err) = station_feed::app::send_test_notification() {
        eprintln!("test notification failed: {err}");
        std::process::exit(1);
    }
}
