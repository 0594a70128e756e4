//! Logical configuration operations.
//!
//! Every operation runs under the configuration lock and along the dispatch
//! plan of the detected firmware. Getters return `None` and setters `false`
//! once all wire paths failed; the failure is published on the log stream.

use crate::{
    Client, Error, Result,
    cli::ConnectionMode,
    client::lock,
    command::Command,
    message::{
        identity,
        mixer::{MixerConfig, PlatformType},
        mode_range::ModeRange,
        pid::{CLI_AXES, PidBlock, PidGains, PidLayout, PidUpdate},
        rc_tuning::{RateProfile, Rates, RcTuning},
        servo::{ServoConfig, ServoLayout},
    },
    negotiator::{FirmwareInfo, Operation, Tier},
};
use log::Level;
use std::collections::BTreeMap;

impl Client {
    /// Queries the firmware identity and stores it in the protocol state.
    pub(crate) async fn probe(&self) -> Result<FirmwareInfo> {
        let api = self.request(Command::ApiVersion, &[]).await?;
        let api = identity::decode_api_version(&api)?;
        let variant = identity::decode_variant(&self.request(Command::FcVariant, &[]).await?)?;
        let version = self.request(Command::FcVersion, &[]).await?;
        let version = identity::decode_fc_version(&version)?;
        let board_id = identity::decode_board_id(&self.request(Command::BoardInfo, &[]).await?)?;
        let info = FirmwareInfo {
            variant,
            version,
            api,
            board_id,
        };

        lock(&self.shared.protocol).firmware = Some(info.clone());

        Ok(info)
    }

    /// Detects the firmware variant, version and API level.
    ///
    /// All firmware-dependent decisions of later operations are derived
    /// from the result.
    pub async fn detect_protocol(&self) -> Option<FirmwareInfo> {
        let _guard = self.config_lock().await;
        let res = self.probe().await;

        if let Ok(info) = &res {
            self.report(
                Level::Info,
                format!(
                    "Detected {} {} (API {}) on board {}",
                    info.variant, info.version, info.api, info.board_id
                ),
            );
        }

        self.settle("Protocol detection", res)
    }

    /// Reads the craft name.
    pub async fn get_craft_name(&self) -> Option<String> {
        let _guard = self.config_lock().await;
        let res = self.request(Command::Name, &[]).await;

        self.settle("Reading craft name", res.map(|p| identity::decode_name(&p)))
    }

    /// Reads the complete PID block.
    ///
    /// Binary blocks are cached for subsequent partial writes. If only the
    /// console answers, the roll, pitch and yaw controllers are returned and
    /// the console stays active until [`exit_cli`](Client::exit_cli) or
    /// [`save_to_nonvolatile`](Client::save_to_nonvolatile), blocking
    /// telemetry and binary operations meanwhile.
    pub async fn get_pid(&self) -> Option<PidBlock> {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::ReadPid, |tier| self.read_pid_via(tier))
            .await;

        self.settle(Operation::ReadPid, res)
    }

    /// Writes PID gains.
    ///
    /// The update is merged into the cached block, which is read first if
    /// necessary, and the complete block is transmitted. On the console, only
    /// the roll, pitch and yaw controllers can be changed.
    pub async fn set_pid(&self, update: &PidUpdate) -> bool {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::WritePid, |tier| self.write_pid_via(tier, update))
            .await;

        self.settle(Operation::WritePid, res).is_some()
    }

    async fn read_pid_via(&self, tier: Tier) -> Result<PidBlock> {
        let block = match tier {
            Tier::Extended => PidBlock::decode_extended(&self.request(Command::Pid2, &[]).await?)?,
            Tier::Legacy => PidBlock::decode_legacy(&self.request(Command::Pid, &[]).await?)?,
            Tier::Cli => return self.read_pid_cli().await,
        };

        lock(&self.shared.protocol).cached_pid = Some(block.clone());

        Ok(block)
    }

    async fn read_pid_cli(&self) -> Result<PidBlock> {
        let inav = lock(&self.shared.protocol).uses_inav_cli();
        let term = |val: String| val.parse::<u8>().map_err(|_| Error::ProtocolMismatch);
        let mut channels = Vec::with_capacity(CLI_AXES.len());

        self.enter_cli().await?;

        for axis in CLI_AXES {
            let [p, i, d, ff] = PidGains::cli_names(axis, inav);
            let p = term(self.cli_get(&p).await?)?;
            let i = term(self.cli_get(&i).await?)?;
            let d = term(self.cli_get(&d).await?)?;
            let ff = match self.cli_get(&ff).await {
                Ok(val) => term(val)?,
                // No feed-forward on this firmware
                Err(Error::CliRejected) => 0,
                Err(err) => return Err(err),
            };

            channels.push(PidGains::new(p, i, d, ff));
        }

        Ok(PidBlock::from_console(channels))
    }

    async fn write_pid_via(&self, tier: Tier, update: &PidUpdate) -> Result<()> {
        let (layout, command) = match tier {
            Tier::Extended => (PidLayout::Extended, Command::SetPid2),
            Tier::Legacy => (PidLayout::Legacy, Command::SetPid),
            Tier::Cli => return self.write_pid_cli(update).await,
        };
        let cached = lock(&self.shared.protocol)
            .cached_pid
            .clone()
            .filter(|block| block.layout() == layout);
        let mut block = match cached {
            Some(block) => block,
            None => self.read_pid_via(tier).await?,
        };

        block.merge(update)?;
        self.request(command, &block.encode()).await?;
        lock(&self.shared.protocol).cached_pid = Some(block);

        Ok(())
    }

    async fn write_pid_cli(&self, update: &PidUpdate) -> Result<()> {
        if update.iter().any(|(index, _)| index >= CLI_AXES.len()) {
            return Err(Error::InvalidArgument);
        }

        let inav = lock(&self.shared.protocol).uses_inav_cli();

        self.enter_cli().await?;

        for (index, gains) in update.iter() {
            let names = PidGains::cli_names(CLI_AXES[index], inav);

            for (name, val) in names.iter().zip(gains.terms()) {
                match self.cli_apply(&format!("set {name} = {val}")).await {
                    // No feed-forward on this firmware, nothing to clear
                    Err(Error::CliRejected) if *name == names[3] && val == 0 => {}
                    res => res?,
                }
            }
        }

        let mut state = lock(&self.shared.protocol);

        if state
            .cached_pid
            .as_mut()
            .is_some_and(|block| block.merge(update).is_err())
        {
            state.cached_pid = None;
        }

        Ok(())
    }

    async fn read_rates_cli(&self) -> Result<Rates> {
        let (extended, layout) = {
            let state = lock(&self.shared.protocol);

            (state.uses_extended_rate_profile(), state.rc_tuning_layout())
        };
        let mut values = Vec::new();

        self.enter_cli().await?;

        for name in Rates::cli_names(extended, layout) {
            values.push(self.cli_get(name).await?);
        }

        Rates::from_cli(extended, layout, &values)
    }

    async fn write_rates_via(&self, tier: Tier, rates: &Rates) -> Result<()> {
        let layout = lock(&self.shared.protocol).rc_tuning_layout();

        match (tier, rates) {
            (Tier::Cli, _) => {
                self.enter_cli().await?;

                for (name, val) in rates.cli_settings(layout)? {
                    self.cli_apply(&format!("set {name} = {val}")).await?;
                }
            }
            (_, Rates::Extended(profile)) => {
                self.request(Command::InavSetRateProfile, &profile.encode())
                    .await?;
            }
            (_, Rates::Legacy(tuning)) => {
                self.request(Command::SetRcTuning, &tuning.encode(layout))
                    .await?;
            }
        }

        Ok(())
    }

    /// Reads rates and expo in the form the firmware uses.
    ///
    /// If only the console answers, it stays active until
    /// [`exit_cli`](Client::exit_cli) or
    /// [`save_to_nonvolatile`](Client::save_to_nonvolatile), blocking
    /// telemetry and binary operations meanwhile.
    pub async fn get_rc_tuning(&self) -> Option<Rates> {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::ReadRcTuning, |tier| async move {
                match tier {
                    Tier::Extended => {
                        let payload = self.request(Command::InavRateProfile, &[]).await?;

                        Ok(Rates::Extended(RateProfile::decode(&payload)?))
                    }
                    Tier::Legacy => {
                        let layout = lock(&self.shared.protocol).rc_tuning_layout();
                        let payload = self.request(Command::RcTuning, &[]).await?;

                        Ok(Rates::Legacy(RcTuning::decode(&payload, layout)?))
                    }
                    Tier::Cli => self.read_rates_cli().await,
                }
            })
            .await;

        self.settle(Operation::ReadRcTuning, res)
    }

    /// Writes rates and expo.
    ///
    /// Only the binary path matching the form of `rates` is attempted before
    /// falling back to the console settings of that form.
    pub async fn set_rc_tuning(&self, rates: &Rates) -> bool {
        let _guard = self.config_lock().await;
        let res = async {
            let tiers: Vec<_> = self
                .plan(Operation::WriteRcTuning)?
                .into_iter()
                .filter(|&tier| match rates {
                    Rates::Extended(_) => tier != Tier::Legacy,
                    Rates::Legacy(_) => tier != Tier::Extended,
                })
                .collect();

            self.run_tiers(Operation::WriteRcTuning, tiers, |tier| {
                self.write_rates_via(tier, rates)
            })
            .await
        }
        .await;

        self.settle(Operation::WriteRcTuning, res).is_some()
    }

    /// Reads all mode activation ranges.
    ///
    /// When read through the console `aux` listing, the console stays
    /// active afterwards. Telemetry and binary operations are blocked until
    /// [`exit_cli`](Client::exit_cli) or
    /// [`save_to_nonvolatile`](Client::save_to_nonvolatile).
    pub async fn get_mode_ranges(&self) -> Option<Vec<ModeRange>> {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::ReadModeRanges, |tier| async move {
                if tier == Tier::Cli {
                    self.enter_cli().await?;

                    let dump = self.cli_dump("aux").await?;

                    Ok(collect_indexed(
                        dump.lines().filter_map(ModeRange::parse_cli_line),
                    ))
                } else {
                    ModeRange::decode_all(&self.request(Command::ModeRanges, &[]).await?)
                }
            })
            .await;

        self.settle(Operation::ReadModeRanges, res)
    }

    /// Writes the mode activation range in the given slot.
    pub async fn set_mode_range(&self, index: u8, range: &ModeRange) -> bool {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::WriteModeRange, |tier| async move {
                if tier == Tier::Cli {
                    self.enter_cli().await?;
                    self.cli_apply(&range.cli_line(index)).await
                } else {
                    self.request(Command::SetModeRange, &range.encode_set(index))
                        .await
                        .map(drop)
                }
            })
            .await;

        self.settle(Operation::WriteModeRange, res).is_some()
    }

    /// Reads all servo configurations.
    ///
    /// A console fallback leaves the console active, blocking telemetry and
    /// binary operations until [`exit_cli`](Client::exit_cli) or
    /// [`save_to_nonvolatile`](Client::save_to_nonvolatile).
    pub async fn get_servo_configs(&self) -> Option<Vec<ServoConfig>> {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::ReadServoConfigs, |tier| async move {
                match tier {
                    Tier::Extended => ServoConfig::decode_all(
                        &self.request(Command::InavServoConfig, &[]).await?,
                        ServoLayout::Extended,
                    ),
                    Tier::Legacy => ServoConfig::decode_all(
                        &self.request(Command::ServoConfigurations, &[]).await?,
                        self.legacy_servo_layout(),
                    ),
                    Tier::Cli => {
                        self.enter_cli().await?;

                        let dump = self.cli_dump("servo").await?;

                        Ok(collect_indexed(
                            dump.lines().filter_map(ServoConfig::parse_cli_line),
                        ))
                    }
                }
            })
            .await;

        self.settle(Operation::ReadServoConfigs, res)
    }

    /// Writes the configuration of the servo at the given index.
    pub async fn set_servo_config(&self, index: u8, config: &ServoConfig) -> bool {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::WriteServoConfig, |tier| async move {
                match tier {
                    Tier::Extended => self
                        .request(
                            Command::InavSetServoConfig,
                            &config.encode_set(index, ServoLayout::Extended),
                        )
                        .await
                        .map(drop),
                    Tier::Legacy => self
                        .request(
                            Command::SetServoConfiguration,
                            &config.encode_set(index, self.legacy_servo_layout()),
                        )
                        .await
                        .map(drop),
                    Tier::Cli => {
                        let inav = lock(&self.shared.protocol).uses_inav_cli();

                        self.enter_cli().await?;
                        self.cli_apply(&config.cli_line(index, inav)).await
                    }
                }
            })
            .await;

        self.settle(Operation::WriteServoConfig, res).is_some()
    }

    fn legacy_servo_layout(&self) -> ServoLayout {
        match lock(&self.shared.protocol).servo_config_path() {
            // Firmware with the extended message still has angle fields
            ServoLayout::Extended => ServoLayout::Legacy14,
            layout => layout,
        }
    }

    /// Persists the configuration to nonvolatile storage.
    ///
    /// The firmware reboots afterwards; this waits until it is reachable
    /// again. While the console is active, it is left with `save`.
    pub async fn save_to_nonvolatile(&self) -> bool {
        let _guard = self.config_lock().await;
        let res = if self.mode() == ConnectionMode::Cli {
            self.exit_cli(true).await
        } else {
            self.run_plan(Operation::Save, |tier| async move {
                if tier == Tier::Cli {
                    self.enter_cli().await?;
                    self.exit_cli(true).await
                } else {
                    self.request_rebooting(Command::EepromWrite, &[]).await?;
                    self.await_reboot().await.map(drop)
                }
            })
            .await
        };

        self.settle(Operation::Save, res).is_some()
    }

    /// Reboots the firmware and waits until it is reachable again.
    pub async fn reboot(&self) -> bool {
        let _guard = self.config_lock().await;
        let res = async {
            self.request_rebooting(Command::Reboot, &[]).await?;
            self.await_reboot().await
        }
        .await;

        self.settle("Reboot", res).is_some()
    }

    /// Reads the platform type.
    pub async fn get_platform_type(&self) -> Option<PlatformType> {
        let _guard = self.config_lock().await;
        let res = self.read_mixer().await.map(|mixer| mixer.platform_type);

        self.settle("Reading platform type", res)
    }

    /// Changes the platform type.
    ///
    /// The new type only takes effect after saving and rebooting, both of
    /// which happen here. The type is verified once the firmware is back.
    pub async fn set_platform_type(&self, platform: PlatformType) -> bool {
        let _guard = self.config_lock().await;
        let res = async {
            let mut mixer = self.read_mixer().await?;

            if mixer.platform_type == platform {
                return Ok(());
            }

            mixer.platform_type = platform;
            self.request(Command::InavSetMixer, &mixer.encode()).await?;
            self.request_rebooting(Command::EepromWrite, &[]).await?;
            self.request_rebooting(Command::Reboot, &[]).await?;
            self.await_reboot().await?;

            if self.read_mixer().await?.platform_type == platform {
                Ok(())
            } else {
                Err(Error::ProtocolMismatch)
            }
        }
        .await;

        self.settle("Changing platform type", res).is_some()
    }

    async fn read_mixer(&self) -> Result<MixerConfig> {
        if !lock(&self.shared.protocol).supports_platform_type() {
            return Err(Error::CommandUnsupported(Command::InavMixer.id()));
        }

        let mixer = MixerConfig::decode(&self.request(Command::InavMixer, &[]).await?)?;

        lock(&self.shared.protocol).platform_type = Some(mixer.platform_type);

        Ok(mixer)
    }

    /// Sends a request after which the firmware may reboot before answering.
    async fn request_rebooting(&self, command: Command, payload: &[u8]) -> Result<()> {
        match self.request(command, payload).await {
            Ok(_) | Err(Error::RequestTimeout(_) | Error::NotConnected) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Orders indexed console entries into a list, filling gaps with defaults.
fn collect_indexed<T: Default + Clone>(entries: impl Iterator<Item = (u8, T)>) -> Vec<T> {
    let entries: BTreeMap<_, _> = entries.collect();
    let len = entries.last_key_value().map_or(0, |(&index, _)| usize::from(index) + 1);
    let mut list = vec![T::default(); len];

    for (index, entry) in entries {
        list[usize::from(index)] = entry;
    }

    list
}
