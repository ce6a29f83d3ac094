fn main() {
    let exit_code = match stone_driver::run::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("stone: error: {}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
