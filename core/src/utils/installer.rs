use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use colored::*;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::Stdio;
use tar::Archive;
use tokio::process::Command;

use crate::utils::resolve_tool;

/// Returns the correct Harrier release asset name for the current OS/arch.
fn get_harrier_asset_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "harrier-windows-amd64.zip"
    } else if cfg!(target_os = "macos") && cfg!(target_arch = "aarch64") {
        "harrier-macos-arm64.tar.gz"
    } else if cfg!(target_os = "macos") {
        "harrier-macos-amd64.tar.gz"
    } else {
        "harrier-linux-amd64.tar.gz"
    }
}

/// Returns the expected binary name inside the archive.
fn get_harrier_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "harrier.exe"
    } else {
        "harrier"
    }
}

/// Returns the download URL for a given tool on the current platform.
fn get_tool_download_url(tool: &str) -> Option<&'static str> {
    match tool {
        "subfinder" => {
            if cfg!(target_os = "windows") {
                Some("https://github.com/projectdiscovery/subfinder/releases/download/v2.6.6/subfinder_2.6.6_windows_amd64.zip")
            } else if cfg!(target_os = "macos") && cfg!(target_arch = "aarch64") {
                Some("https://github.com/projectdiscovery/subfinder/releases/download/v2.6.6/subfinder_2.6.6_macOS_arm64.zip")
            } else if cfg!(target_os = "macos") {
                Some("https://github.com/projectdiscovery/subfinder/releases/download/v2.6.6/subfinder_2.6.6_macOS_amd64.zip")
            } else {
                Some("https://github.com/projectdiscovery/subfinder/releases/download/v2.6.6/subfinder_2.6.6_linux_amd64.zip")
            }
        }
        "nuclei" => {
            if cfg!(target_os = "windows") {
                Some("https://github.com/projectdiscovery/nuclei/releases/download/v3.2.4/nuclei_3.2.4_windows_amd64.zip")
            } else if cfg!(target_os = "macos") && cfg!(target_arch = "aarch64") {
                Some("https://github.com/projectdiscovery/nuclei/releases/download/v3.2.4/nuclei_3.2.4_macOS_arm64.zip")
            } else if cfg!(target_os = "macos") {
                Some("https://github.com/projectdiscovery/nuclei/releases/download/v3.2.4/nuclei_3.2.4_macOS_amd64.zip")
            } else {
                Some("https://github.com/projectdiscovery/nuclei/releases/download/v3.2.4/nuclei_3.2.4_linux_amd64.zip")
            }
        }
        _ => None,
    }
}

/// Verifies required tools are present, downloading the downloadable ones
/// into ./tools when missing. nmap is only checked, never installed.
pub async fn ensure_tools() {
    print!("{}\r\n", "[*] Checking dependencies...".bright_cyan());
    let tools_dir = Path::new("./tools");

    if !tools_dir.exists() {
        if let Err(e) = fs::create_dir_all(tools_dir) {
            eprint!(
                "{}\r\n",
                format!("[!] Failed to create tools directory: {}", e).red()
            );
            std::process::exit(1);
        }
    }

    for tool in ["subfinder", "nuclei"] {
        if resolve_tool(tool).is_some() {
            print!("{}\r\n", format!("[+] {} found.", tool).green());
            continue;
        }
        print!(
            "{}\r\n",
            format!("[*] {} not found. Downloading...", tool).yellow()
        );
        match get_tool_download_url(tool) {
            Some(url) => download_and_extract(url, tools_dir).await,
            None => eprint!("{}\r\n", format!("[!] No download source for {}.", tool).red()),
        }
    }

    if resolve_tool("nmap").is_some() {
        print!("{}\r\n", "[+] nmap found.".green());
    } else {
        print!(
            "{}\r\n",
            "[!] nmap not found. Install it with your package manager (e.g. apt install nmap)."
                .yellow()
        );
    }

    print!("{}\r\n", "[+] Dependency check complete.".green().bold());
}

/// Runs a full update cycle: Nuclei binary, templates, and Harrier self-update.
pub async fn run_full_update() {
    print!("{}\r\n", "         Harrier Full Update".bright_cyan().bold());

    update_nuclei().await;
    update_nuclei_templates().await;
    self_update().await;

    print!(
        "\r\n{}\r\n",
        "[+] All updates completed successfully!".green().bold()
    );
}

async fn update_nuclei() {
    print!("\r\n{}\r\n", "[*] Updating Nuclei...".bright_cyan());

    let nuclei_path = match resolve_tool("nuclei") {
        Some(p) => p,
        None => {
            print!("{}\r\n", "[!] Nuclei not found, skipping update.".yellow());
            return;
        }
    };

    match Command::new(&nuclei_path)
        .arg("-update")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
    {
        Ok(status) if status.success() => {
            print!("{}\r\n", "[+] Nuclei updated.".green());
        }
        Ok(status) => {
            print!(
                "{}\r\n",
                format!("[!] Nuclei update exited with: {}", status).yellow()
            );
        }
        Err(e) => {
            print!(
                "{}\r\n",
                format!("[!] Failed to run Nuclei update: {}", e).red()
            );
        }
    }
}

async fn update_nuclei_templates() {
    print!("\r\n{}\r\n", "[*] Updating Nuclei Templates...".bright_cyan());

    let nuclei_path = match resolve_tool("nuclei") {
        Some(p) => p,
        None => {
            print!(
                "{}\r\n",
                "[!] Nuclei not found, skipping template update.".yellow()
            );
            return;
        }
    };

    match Command::new(&nuclei_path)
        .arg("-ut")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
    {
        Ok(status) if status.success() => {
            print!("{}\r\n", "[+] Nuclei templates updated.".green());
        }
        Ok(status) => {
            print!(
                "{}\r\n",
                format!("[!] Template update exited with: {}", status).yellow()
            );
        }
        Err(e) => {
            print!(
                "{}\r\n",
                format!("[!] Failed to update templates: {}", e).red()
            );
        }
    }
}

async fn self_update() {
    print!(
        "\r\n{}\r\n",
        "[*] Checking for Harrier self-update...".bright_cyan()
    );

    // 1. Detect
    let asset_name = get_harrier_asset_name();
    let binary_name = get_harrier_binary_name();
    let download_url = format!(
        "https://github.com/harrier-sec/harrier/releases/latest/download/{}",
        asset_name
    );

    let current_exe = match std::env::current_exe() {
        Ok(p) => p,
        Err(e) => {
            print!(
                "{}\r\n",
                format!("[!] Cannot determine current exe path: {}", e).red()
            );
            return;
        }
    };

    // 2. Download
    let bytes = match download_with_progress(&download_url).await {
        Some(b) => b,
        None => return,
    };

    // 3. Extract binary from archive
    print!("{}\r\n", "[*] Extracting binary from archive...".blue());

    let extracted = if asset_name.ends_with(".tar.gz") {
        extract_binary_from_tar_gz(&bytes, binary_name)
    } else {
        extract_binary_from_zip(&bytes, binary_name)
    };

    let binary_bytes = match extracted {
        Ok(b) => b,
        Err(e) => {
            print!("{}\r\n", format!("[!] Failed to extract binary: {}", e).red());
            return;
        }
    };

    // 4. Replace current binary
    let tmp_path = current_exe.with_extension("tmp");
    let backup_path = current_exe.with_extension("bak");

    if let Err(e) = fs::write(&tmp_path, &binary_bytes) {
        print!(
            "{}\r\n",
            format!("[!] Failed to write temp binary: {}", e).red()
        );
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        if let Err(e) = fs::set_permissions(&tmp_path, perms) {
            print!(
                "{}\r\n",
                format!("[!] Failed to set permissions: {}", e).red()
            );
            let _ = fs::remove_file(&tmp_path);
            return;
        }
    }

    if backup_path.exists() {
        let _ = fs::remove_file(&backup_path);
    }

    if let Err(e) = fs::rename(&current_exe, &backup_path) {
        if e.kind() == io::ErrorKind::PermissionDenied {
            print!(
                "{}\r\n",
                "[!] Permission denied. Try re-running with: sudo harrier --update"
                    .red()
                    .bold()
            );
        } else {
            print!(
                "{}\r\n",
                format!("[!] Failed to rename current binary: {}", e).red()
            );
        }
        let _ = fs::remove_file(&tmp_path);
        return;
    }

    if let Err(e) = fs::rename(&tmp_path, &current_exe) {
        if e.kind() == io::ErrorKind::PermissionDenied {
            print!(
                "{}\r\n",
                "[!] Permission denied. Try re-running with: sudo harrier --update"
                    .red()
                    .bold()
            );
        } else {
            print!(
                "{}\r\n",
                format!("[!] Failed to install new binary: {}", e).red()
            );
        }
        let _ = fs::rename(&backup_path, &current_exe);
        return;
    }

    // 5. Cleanup
    let _ = fs::remove_file(&backup_path);

    print!(
        "{}\r\n",
        "[+] Harrier binary updated successfully!".green().bold()
    );
}

/// Downloads a URL into memory with a progress bar. Prints and returns None
/// on any failure.
async fn download_with_progress(url: &str) -> Option<Vec<u8>> {
    print!("{}\r\n", format!("[*] Downloading {} ...", url).dimmed());

    let mut response = match reqwest::get(url).await {
        Ok(r) => r,
        Err(e) => {
            print!("{}\r\n", format!("[!] Download failed: {}", e).red());
            return None;
        }
    };

    if !response.status().is_success() {
        print!(
            "{}\r\n",
            format!("[!] Server returned status: {}", response.status()).red()
        );
        return None;
    }

    let total = response.content_length().unwrap_or(0);
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:30.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut bytes = Vec::with_capacity(total as usize);
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                bytes.extend_from_slice(&chunk);
                bar.inc(chunk.len() as u64);
            }
            Ok(None) => break,
            Err(e) => {
                bar.abandon();
                print!(
                    "{}\r\n",
                    format!("[!] Failed to read response: {}", e).red()
                );
                return None;
            }
        }
    }

    bar.finish_and_clear();
    Some(bytes)
}

/// Extracts a named binary from a `.tar.gz` archive in memory.
fn extract_binary_from_tar_gz(data: &[u8], binary_name: &str) -> io::Result<Vec<u8>> {
    let decoder = GzDecoder::new(Cursor::new(data));
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();

        if file_name == binary_name {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("binary '{}' not found in archive", binary_name),
    ))
}

/// Extracts a named binary from a `.zip` archive in memory.
fn extract_binary_from_zip(data: &[u8], binary_name: &str) -> io::Result<Vec<u8>> {
    let cursor = Cursor::new(data);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let name = PathBuf::from(file.name().to_string());
        let file_name = name.file_name().unwrap_or_default().to_string_lossy();

        if file_name == binary_name {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("binary '{}' not found in archive", binary_name),
    ))
}

/// Downloads a zip archive and extracts tool binaries into the target directory.
async fn download_and_extract(url: &str, target_dir: &Path) {
    let bytes = match download_with_progress(url).await {
        Some(b) => b,
        None => return,
    };

    print!("{}\r\n", "[*] Extracting...".blue());

    let cursor = Cursor::new(bytes);
    let mut archive = match zip::ZipArchive::new(cursor) {
        Ok(a) => a,
        Err(e) => {
            eprint!(
                "{}\r\n",
                format!("[!] Failed to open zip archive: {}", e).red()
            );
            return;
        }
    };

    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(f) => f,
            Err(_) => continue,
        };

        let outpath = match file.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => continue,
        };

        // On Windows extract .exe files; on Unix tool binaries inside the
        // zip typically have no extension.
        let name = file.name().to_string();
        let is_tool_binary = if cfg!(target_os = "windows") {
            name.ends_with(".exe")
        } else {
            let p = std::path::Path::new(&name);
            p.extension().is_none() && !name.ends_with('/')
        };

        if is_tool_binary {
            match fs::File::create(&outpath) {
                Ok(mut outfile) => {
                    if let Err(e) = io::copy(&mut file, &mut outfile) {
                        eprint!("{}\r\n", format!("[!] Failed to write binary: {}", e).red());
                        return;
                    }

                    // On Unix, make extracted binary executable.
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let perms = std::fs::Permissions::from_mode(0o755);
                        let _ = fs::set_permissions(&outpath, perms);
                    }
                }
                Err(e) => {
                    eprint!(
                        "{}\r\n",
                        format!("[!] Failed to create output file: {}", e).red()
                    );
                    return;
                }
            }
        }
    }

    print!("{}\r\n", "[+] Installed successfully.".green());
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn sample_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::FileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn sample_tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_binary_from_zip_by_name() {
        let archive = sample_zip(&[("README.md", b"docs"), ("nuclei", b"\x7fELF")]);
        let bytes = extract_binary_from_zip(&archive, "nuclei").unwrap();
        assert_eq!(bytes, b"\x7fELF");
    }

    #[test]
    fn test_extract_binary_from_zip_missing() {
        let archive = sample_zip(&[("README.md", b"docs")]);
        assert!(extract_binary_from_zip(&archive, "nuclei").is_err());
    }

    #[test]
    fn test_extract_binary_from_tar_gz_by_name() {
        let archive = sample_tar_gz(&[("harrier", b"\x7fELF"), ("LICENSE", b"mit")]);
        let bytes = extract_binary_from_tar_gz(&archive, "harrier").unwrap();
        assert_eq!(bytes, b"\x7fELF");
    }

    #[test]
    fn test_asset_names_match_platform_conventions() {
        let asset = get_harrier_asset_name();
        assert!(asset.starts_with("harrier-"));
        assert!(asset.ends_with(".zip") || asset.ends_with(".tar.gz"));
    }
}
