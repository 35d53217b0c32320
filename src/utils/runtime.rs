use std::process;

pub fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: signal-queue relies on POSIX sockets and signals");
        process::exit(2);
    }
}
