/// Service name reported for ports missing from the table.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Well-known TCP ports and their service names, sorted by port.
const WELL_KNOWN: &[(u16, &str)] = &[
    (20, "ftp-data"),
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (110, "pop3"),
    (111, "rpcbind"),
    (135, "msrpc"),
    (139, "netbios-ssn"),
    (143, "imap"),
    (389, "ldap"),
    (443, "https"),
    (445, "smb"),
    (465, "smtps"),
    (587, "submission"),
    (631, "ipp"),
    (993, "imaps"),
    (995, "pop3s"),
    (1433, "mssql"),
    (1521, "oracle"),
    (1883, "mqtt"),
    (2049, "nfs"),
    (3306, "mysql"),
    (3389, "rdp"),
    (5432, "postgresql"),
    (5672, "amqp"),
    (5900, "vnc"),
    (6379, "redis"),
    (8080, "http-alt"),
    (8443, "https-alt"),
    (9200, "elasticsearch"),
    (11211, "memcached"),
    (27017, "mongodb"),
];

/// Look up the service name for a port, or [`UNKNOWN_SERVICE`].
pub fn service_name(port: u16) -> &'static str {
    WELL_KNOWN
        .binary_search_by_key(&port, |&(p, _)| p)
        .map(|idx| WELL_KNOWN[idx].1)
        .unwrap_or(UNKNOWN_SERVICE)
}
