pub mod nmap;
pub mod nuclei;
pub mod subfinder;
pub mod webprobe;
