//! Canned node-exporter scrape bodies for testing.
//!
//! `SCRAPE_OLDER` and `SCRAPE_NEWER` are 10 seconds apart. They cover every
//! family the collectors read, plus noise lines the parser must ignore:
//! - CPU: 2 cores × 4 modes, total rate 2.0, idle+iowait rate 1.05
//! - memory: 4 GiB available in the newer scrape
//! - filesystems: `/`, `/run`, `/data`
//! - disks: `sda` in both scrapes; `sdb` only in the newer one
//! - network: `eth0` at 10 Mbps rx / 2 Mbps tx; `lo` rx counter reset

pub const SCRAPE_OLDER: &str = r#"# HELP go_goroutines Number of goroutines that currently exist.
# TYPE go_goroutines gauge
go_goroutines 8
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu="0",mode="idle"} 1000
node_cpu_seconds_total{cpu="0",mode="iowait"} 10
node_cpu_seconds_total{cpu="0",mode="system"} 50
node_cpu_seconds_total{cpu="0",mode="user"} 200
node_cpu_seconds_total{cpu="1",mode="idle"} 900
node_cpu_seconds_total{cpu="1",mode="iowait"} 0
node_cpu_seconds_total{cpu="1",mode="system"} 80
node_cpu_seconds_total{cpu="1",mode="user"} 300
# HELP node_disk_read_bytes_total The total number of bytes read successfully.
# TYPE node_disk_read_bytes_total counter
node_disk_read_bytes_total{device="sda"} 1e+06
# HELP node_disk_reads_completed_total The total number of reads completed successfully.
# TYPE node_disk_reads_completed_total counter
node_disk_reads_completed_total{device="sda"} 1000
# HELP node_disk_writes_completed_total The total number of writes completed successfully.
# TYPE node_disk_writes_completed_total counter
node_disk_writes_completed_total{device="sda"} 2000
# HELP node_disk_written_bytes_total The total number of bytes written successfully.
# TYPE node_disk_written_bytes_total counter
node_disk_written_bytes_total{device="sda"} 2e+06
# HELP node_filesystem_free_bytes Filesystem free space in bytes.
# TYPE node_filesystem_free_bytes gauge
node_filesystem_free_bytes{device="/dev/sda1",fstype="ext4",mountpoint="/"} 5.1e+09
node_filesystem_free_bytes{device="tmpfs",fstype="tmpfs",mountpoint="/run"} 1.6e+08
node_filesystem_free_bytes{device="/dev/sdb1",fstype="xfs",mountpoint="/data"} 1.073741824e+10
# HELP node_memory_MemAvailable_bytes Memory information field MemAvailable_bytes.
# TYPE node_memory_MemAvailable_bytes gauge
node_memory_MemAvailable_bytes 8.589934592e+09
# HELP node_network_receive_bytes_total Network device statistic receive_bytes.
# TYPE node_network_receive_bytes_total counter
node_network_receive_bytes_total{device="eth0"} 1e+09
node_network_receive_bytes_total{device="lo"} 100
# HELP node_network_transmit_bytes_total Network device statistic transmit_bytes.
# TYPE node_network_transmit_bytes_total counter
node_network_transmit_bytes_total{device="eth0"} 5e+08
node_network_transmit_bytes_total{device="lo"} 100
node_scrape_collector_success{collector="cpu"} 1
"#;

pub const SCRAPE_NEWER: &str = r#"# HELP go_goroutines Number of goroutines that currently exist.
# TYPE go_goroutines gauge
go_goroutines 9
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu="0",mode="idle"} 1008
node_cpu_seconds_total{cpu="0",mode="iowait"} 10.5
node_cpu_seconds_total{cpu="0",mode="system"} 50.5
node_cpu_seconds_total{cpu="0",mode="user"} 201
node_cpu_seconds_total{cpu="1",mode="idle"} 902
node_cpu_seconds_total{cpu="1",mode="iowait"} 0
node_cpu_seconds_total{cpu="1",mode="system"} 81
node_cpu_seconds_total{cpu="1",mode="user"} 307
node_cpu_seconds_total{cpu="1",mode="steal" 3
# HELP node_disk_read_bytes_total The total number of bytes read successfully.
# TYPE node_disk_read_bytes_total counter
node_disk_read_bytes_total{device="sda"} 1.148576e+07
node_disk_read_bytes_total{device="sdb"} 4096
# HELP node_disk_reads_completed_total The total number of reads completed successfully.
# TYPE node_disk_reads_completed_total counter
node_disk_reads_completed_total{device="sda"} 1500
node_disk_reads_completed_total{device="sdb"} 1
# HELP node_disk_writes_completed_total The total number of writes completed successfully.
# TYPE node_disk_writes_completed_total counter
node_disk_writes_completed_total{device="sda"} 2300
node_disk_writes_completed_total{device="sdb"} 1
# HELP node_disk_written_bytes_total The total number of bytes written successfully.
# TYPE node_disk_written_bytes_total counter
node_disk_written_bytes_total{device="sda"} 7.24288e+06
node_disk_written_bytes_total{device="sdb"} 4096
# HELP node_filesystem_free_bytes Filesystem free space in bytes.
# TYPE node_filesystem_free_bytes gauge
node_filesystem_free_bytes{device="/dev/sda1",fstype="ext4",mountpoint="/"} 5e+09
node_filesystem_free_bytes{device="tmpfs",fstype="tmpfs",mountpoint="/run"} 1.6e+08
node_filesystem_free_bytes{device="/dev/sdb1",fstype="xfs",mountpoint="/data"} 1.073741824e+10
# HELP node_memory_MemAvailable_bytes Memory information field MemAvailable_bytes.
# TYPE node_memory_MemAvailable_bytes gauge
node_memory_MemAvailable_bytes 4.294967296e+09
# HELP node_network_receive_bytes_total Network device statistic receive_bytes.
# TYPE node_network_receive_bytes_total counter
node_network_receive_bytes_total{device="eth0"} 1.0131072e+09
node_network_receive_bytes_total{device="lo"} 50
# HELP node_network_transmit_bytes_total Network device statistic transmit_bytes.
# TYPE node_network_transmit_bytes_total counter
node_network_transmit_bytes_total{device="eth0"} 5.0262144e+08
node_network_transmit_bytes_total{device="lo"} 100
node_scrape_collector_success{collector="cpu"} 1
"#;
