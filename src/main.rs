use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    clipgen::cli::main()
}
