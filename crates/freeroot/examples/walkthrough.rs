use freeroot::RunOptions;
use std::time::Duration;

fn main() {
    println!("=== freeroot walkthrough ===\n");

    println!("1. Setup:");
    let mut session = match freeroot::setup() {
        Ok(session) => {
            println!(
                "   rootfs: {} | arch: {} | proot: {}",
                session.path().display(),
                session.arch(),
                session.proot().display()
            );
            session
        }
        Err(e) => {
            eprintln!("   Error: {}", e);
            return;
        }
    };

    println!("\n2. Command:");
    match session.run_command("grep PRETTY_NAME /etc/os-release && id -un") {
        Ok(result) => {
            println!("   Exit: {} | Success: {}", result.exit_code, result.success());
            for line in result.output.lines() {
                println!("   {}", line);
            }
        }
        Err(e) => eprintln!("   Error: {}", e),
    }

    println!("\n3. Non-zero exit:");
    match session.run_command("exit 7") {
        Ok(result) => println!("   Exit: {} | Success: {}", result.exit_code, result.success()),
        Err(e) => eprintln!("   Error: {}", e),
    }

    println!("\n4. Timeout:");
    let opts = RunOptions::new().timeout(Duration::from_millis(500));
    match session.run_command_with("sleep 10", &opts) {
        Ok(result) => println!("   Status: {:?} after {:?}", result.status, result.duration),
        Err(e) => eprintln!("   Error: {}", e),
    }

    println!("\n5. Piped shell:");
    let piped = session
        .spawn_shell()
        .and_then(|_| session.write_stdin(b"cd /tmp && pwd\n"))
        .and_then(|_| session.close_shell());
    match piped {
        Ok(Some(result)) => println!("   Output: {}", result.output.trim()),
        Ok(None) => println!("   No shell"),
        Err(e) => eprintln!("   Error: {}", e),
    }

    println!("\n=== Done (rootfs kept; run `freeroot cleanup` to remove) ===");
}
