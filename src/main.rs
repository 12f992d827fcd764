fn main() {
    if let Err(err) = qr_attendance_lib::run() {
        log::error!("{err:#}");
        eprintln!("qr-attendance: {err:#}");
        std::process::exit(1);
    }
}
