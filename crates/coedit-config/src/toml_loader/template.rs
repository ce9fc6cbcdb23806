//! Default TOML config template with inline documentation comments.

pub(crate) fn default_config_toml() -> String {
    r##"# coedit configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[hub]
# bind_addr = "0.0.0.0"
# port = 8000
# hello_timeout_secs = 10    # 1-120

[session]
# hub_url = "ws://localhost:8000"
# reconnect_delay_secs = 3   # 1-60, fixed (no exponential growth)
# max_reconnect_attempts = 0 # 0 = retry forever
# connect_timeout_secs = 15

[admission]
# pending_poll_ms = 1000     # lobby poll
# admitted_poll_ms = 2000    # eviction watch

[voice]
# enabled = true
# ice_servers = ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"]
# max_participants = 8       # 2-32

[chat]
# max_messages = 500

[execution]
# endpoint = "https://emkc.org/api/v2/piston"
# timeout_secs = 30

[logging]
# level = "info"             # trace, debug, info, warn, error
"##
    .to_string()
}
