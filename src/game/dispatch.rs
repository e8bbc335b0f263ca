//! 能力触发与结算：触发扫描、奥秘、目标解析、选择器挂起与持续效果重算。

use std::sync::Arc;

use tracing::{debug, trace};

use super::ability::{AbilityDef, AbilityTarget, AbilityTrigger, AbilityType, TargetRef};
use super::engine::GameLogic;
use super::effects::EffectContext;
use super::events::GameEvent;
use super::queue::{QueuedAbility, QueuedSecret};
use super::rules::RuleError;
use super::state::{Card, CardUid, HistoryEntry, PlayerId, Selector, SelectorContext, Slot, Zone};
use super::status::StatusType;

#[derive(Debug, Clone, Copy)]
enum OngoingTarget {
    Card(CardUid),
    Player(PlayerId),
}

impl GameLogic {
    // ---- 触发 ----

    fn abilities_with_trigger(&self, caster: &Card, trigger: AbilityTrigger) -> Vec<Arc<AbilityDef>> {
        caster
            .ability_ids()
            .filter_map(|id| self.catalog.ability(id))
            .filter(|ability| ability.trigger == trigger)
            .collect()
    }

    /// 扫描卡牌自身（持久能力在前，持续能力在后），再递归到其装备。
    pub fn trigger_card_ability_type(&mut self, trigger: AbilityTrigger, caster: CardUid, triggerer: Option<CardUid>) {
        let Some(card) = self.game.card(caster) else {
            return;
        };
        let equipped = card.equipped_uid;
        for ability in self.abilities_with_trigger(card, trigger) {
            self.trigger_card_ability(&ability, caster, triggerer);
        }
        if let Some(equip) = equipped {
            self.trigger_card_ability_type(trigger, equip, triggerer);
        }
    }

    /// 以玩家为触发者的变体：条件针对该玩家判定，触发者记为施放者本身。
    pub fn trigger_card_ability_type_player(&mut self, trigger: AbilityTrigger, caster: CardUid, player_id: PlayerId) {
        let Some(card) = self.game.card(caster) else {
            return;
        };
        let equipped = card.equipped_uid;
        let matched: Vec<Arc<AbilityDef>> = match self.game.get_player(player_id) {
            Some(player) if !card.has_status(StatusType::Silenced) => self
                .abilities_with_trigger(card, trigger)
                .into_iter()
                .filter(|ability| {
                    ability.are_trigger_conditions_met(&self.game, &self.catalog, card, TargetRef::Player(player))
                })
                .collect(),
            _ => Vec::new(),
        };
        for ability in matched {
            self.queue.push_ability(&ability.id, caster, Some(caster));
        }
        if let Some(equip) = equipped {
            self.trigger_card_ability_type_player(trigger, equip, player_id);
        }
    }

    /// 触发者缺省为施放者本身。
    pub fn trigger_card_ability(&mut self, ability: &AbilityDef, caster: CardUid, triggerer: Option<CardUid>) {
        let Some(card) = self.game.card(caster) else {
            return;
        };
        let trigger_uid = triggerer.unwrap_or(caster);
        let trigger_card = self.game.card(trigger_uid).unwrap_or(card);
        if !card.has_status(StatusType::Silenced)
            && ability.are_trigger_conditions_met(&self.game, &self.catalog, card, TargetRef::Card(trigger_card))
        {
            trace!(target: "engine", ability = %ability.id, caster, "ability queued");
            self.queue.push_ability(&ability.id, caster, Some(trigger_uid));
        }
    }

    pub fn trigger_other_cards_ability_type(&mut self, trigger: AbilityTrigger, triggerer: CardUid) {
        let casters: Vec<CardUid> = self
            .game
            .players
            .iter()
            .flat_map(|player| player.hero.iter().chain(player.cards_board.iter()))
            .map(|card| card.uid)
            .collect();
        for caster in casters {
            self.trigger_card_ability_type(trigger, caster, Some(triggerer));
        }
    }

    pub fn trigger_player_cards_ability_type(&mut self, player_id: PlayerId, trigger: AbilityTrigger) {
        let Some(player) = self.game.get_player(player_id) else {
            return;
        };
        let casters: Vec<CardUid> = player
            .hero
            .iter()
            .chain(player.cards_board.iter())
            .map(|card| card.uid)
            .collect();
        for caster in casters {
            self.trigger_card_ability_type(trigger, caster, Some(caster));
        }
    }

    // ---- 奥秘 ----

    fn secret_matches(&self, secret: &Card, trigger: AbilityTrigger, triggerer: &Card) -> bool {
        let is_secret = secret
            .def(&self.catalog)
            .map(|def| def.is_secret())
            .unwrap_or(false);
        is_secret
            && self.abilities_with_trigger(secret, trigger).iter().any(|ability| {
                ability.are_trigger_conditions_met(&self.game, &self.catalog, secret, TargetRef::Card(triggerer))
            })
    }

    fn queue_secret(&mut self, trigger: AbilityTrigger, secret: CardUid, triggerer: CardUid) {
        self.queue.push_secret(trigger, secret, Some(triggerer));
        self.queue.set_delay(self.settings.delays.secret());
        debug!(target: "engine", secret, triggerer, ?trigger, "secret triggered");
        self.emit(GameEvent::SecretTriggered {
            secret,
            triggerer: Some(triggerer),
        });
    }

    /// 玩家自己的奥秘区，按位置顺序最多触发一张。
    pub fn trigger_player_secrets(&mut self, player_id: PlayerId, trigger: AbilityTrigger) -> bool {
        let Some(player) = self.game.get_player(player_id) else {
            return false;
        };
        let found = player
            .cards_secret
            .iter()
            .find(|secret| self.secret_matches(secret, trigger, secret))
            .map(|secret| secret.uid);
        match found {
            Some(secret) => {
                self.queue_secret(trigger, secret, secret);
                true
            }
            None => false,
        }
    }

    /// 非当前玩家的奥秘区按位置顺序扫描，每次事件最多触发一张。
    pub fn trigger_secrets(&mut self, trigger: AbilityTrigger, triggerer: Option<CardUid>) -> bool {
        if let Some(card) = triggerer.and_then(|uid| self.game.card(uid)) {
            if card.has_status(StatusType::SpellImmunity) {
                return false;
            }
        }
        let wards_disabled = self
            .game
            .get_player(self.game.current_player)
            .map(|player| {
                player
                    .cards_board
                    .iter()
                    .any(|card| card.has_status(StatusType::DisableEnemyWards))
            })
            .unwrap_or(false);
        if wards_disabled {
            return false;
        }

        let current = self.game.current_player;
        let mut found = None;
        for player in self.game.players.iter().filter(|p| p.player_id != current) {
            for secret in player.cards_secret.iter() {
                if secret.has_status(StatusType::Silenced) {
                    continue;
                }
                let trigger_card = triggerer.and_then(|uid| self.game.card(uid)).unwrap_or(secret);
                if self.secret_matches(secret, trigger, trigger_card) {
                    found = Some((secret.uid, trigger_card.uid));
                    break;
                }
            }
            if found.is_some() {
                break;
            }
        }

        match found {
            Some((secret, trigger_card)) => {
                self.queue_secret(trigger, secret, trigger_card);
                true
            }
            None => false,
        }
    }

    pub(crate) fn resolve_secret(&mut self, item: QueuedSecret) {
        let Some(secret) = self.game.card(item.secret) else {
            return;
        };
        if !secret.def(&self.catalog).map(|def| def.is_secret()).unwrap_or(false) {
            return;
        }
        let triggerer = item.triggerer.unwrap_or(item.secret);
        if let Some(owner) = self.game.owner_of(triggerer) {
            if let Some(player) = self.game.get_player_mut(owner) {
                player.history.push(HistoryEntry::SecretTriggered {
                    uid: item.secret,
                    triggerer,
                });
            }
        }
        self.trigger_card_ability_type(item.trigger, item.secret, Some(triggerer));
        self.discard_card(item.secret);
        self.emit(GameEvent::SecretResolved { secret: item.secret });
    }

    // ---- 结算 ----

    pub(crate) fn resolve_queued_ability(&mut self, item: QueuedAbility) {
        if let Some(ability) = self.catalog.ability(&item.ability_id) {
            self.resolve_card_ability(ability, item.caster, item.triggerer);
        }
    }

    /// 需要玩家选择的能力在此挂起，否则依次执行各目标解析步骤。
    pub(crate) fn resolve_card_ability(&mut self, ability: Arc<AbilityDef>, caster: CardUid, triggerer: Option<CardUid>) {
        match self.game.card(caster) {
            Some(card) if card.can_do_abilities() => {}
            _ => return,
        }
        self.emit(GameEvent::AbilityTriggered {
            ability_id: ability.id.clone(),
            caster,
        });
        self.game.ability_triggerer = triggerer;

        let selector = match ability.target {
            AbilityTarget::SelectTarget => Some(Selector::SelectTarget as fn(SelectorContext) -> Selector),
            AbilityTarget::CardSelector => Some(Selector::SelectorCard as fn(SelectorContext) -> Selector),
            AbilityTarget::ChoiceSelector => Some(Selector::SelectorChoice as fn(SelectorContext) -> Selector),
            _ => None,
        };
        if let Some(kind) = selector {
            self.go_to_selector(kind, &ability, caster);
            return;
        }

        let ctx = EffectContext {
            ability: Arc::clone(&ability),
            caster,
            triggerer,
        };
        self.resolve_play_target(&ctx);
        self.resolve_players(&ctx);
        self.resolve_cards(&ctx);
        self.resolve_slots(&ctx);
        self.resolve_card_data(&ctx);
        if ability.target == AbilityTarget::None {
            for effect in &ability.effects {
                effect.apply_none(self, &ctx);
            }
        }
        self.after_ability_resolved(&ability, caster);
    }

    fn go_to_selector(&mut self, kind: fn(SelectorContext) -> Selector, ability: &AbilityDef, caster: CardUid) {
        let Some(player_id) = self.game.card(caster).map(|card| card.player_id) else {
            return;
        };
        self.game.selector = kind(SelectorContext {
            player_id,
            ability_id: ability.id.clone(),
            caster_uid: caster,
        });
        debug!(target: "engine", ability = %ability.id, caster, player_id, "waiting for selection");
        self.emit(GameEvent::SelectorStarted {
            player_id,
            ability_id: ability.id.clone(),
        });
    }

    fn resolve_play_target(&mut self, ctx: &EffectContext) {
        if ctx.ability.target != AbilityTarget::PlayTarget {
            return;
        }
        let Some(caster) = self.game.card(ctx.caster) else {
            return;
        };
        let Some(slot) = caster.slot else {
            return;
        };
        let ability = &ctx.ability;

        if slot.is_player_slot() {
            let valid = self
                .game
                .get_player(slot.p)
                .map(|player| ability.can_target(&self.game, &self.catalog, caster, TargetRef::Player(player)))
                .unwrap_or(false);
            if valid {
                self.resolve_effect_player(ctx, slot.p);
            }
        } else if let Some(target) = self.game.board_card_at(slot) {
            if ability.can_target(&self.game, &self.catalog, caster, TargetRef::Card(target)) {
                let uid = target.uid;
                self.resolve_effect_card(ctx, uid);
            }
        } else if ability.can_target(&self.game, &self.catalog, caster, TargetRef::Slot(slot)) {
            self.resolve_effect_slot(ctx, slot);
        }
    }

    fn player_targets(&mut self, ctx: &EffectContext) -> Vec<PlayerId> {
        let Some(caster) = self.game.card(ctx.caster) else {
            return Vec::new();
        };
        let owner = caster.player_id;
        let ability = &ctx.ability;
        let candidates: Vec<PlayerId> = self
            .game
            .players
            .iter()
            .filter(|player| match ability.target {
                AbilityTarget::PlayerSelf => player.player_id == owner,
                AbilityTarget::PlayerOpponent => player.player_id != owner,
                AbilityTarget::AllPlayers => true,
                _ => false,
            })
            .filter(|player| ability.can_target(&self.game, &self.catalog, caster, TargetRef::Player(player)))
            .map(|player| player.player_id)
            .collect();
        match ability.filter_target {
            Some(filter) if !candidates.is_empty() => filter.apply(candidates, &mut self.rng),
            _ => candidates,
        }
    }

    fn card_candidates(&self, ability: &AbilityDef, caster: &Card) -> Vec<CardUid> {
        let game = &self.game;
        let single = |uid: Option<CardUid>| uid.into_iter().collect::<Vec<_>>();
        match ability.target {
            AbilityTarget::CharacterSelf => vec![caster.uid],
            AbilityTarget::AllCardsBoard => game
                .players
                .iter()
                .flat_map(|p| p.cards_board.iter())
                .map(|c| c.uid)
                .collect(),
            AbilityTarget::AllCardsHand => game
                .players
                .iter()
                .flat_map(|p| p.cards_hand.iter())
                .map(|c| c.uid)
                .collect(),
            AbilityTarget::AllCardsAllPiles => game
                .players
                .iter()
                .flat_map(|p| p.all_cards())
                .filter(|c| game.zone_of(c.uid) != Some(Zone::Hero))
                .map(|c| c.uid)
                .collect(),
            AbilityTarget::LastPlayed => single(game.last_played),
            AbilityTarget::LastTargeted => single(game.last_targeted),
            AbilityTarget::LastDestroyed => single(game.last_destroyed),
            AbilityTarget::LastSummoned => single(game.last_summoned),
            AbilityTarget::AbilityTriggerer => single(game.ability_triggerer),
            AbilityTarget::EquippedCard => {
                let is_equipment = caster.def(&self.catalog).map(|d| d.is_equipment()).unwrap_or(false);
                if is_equipment {
                    single(game.bearer_of(caster.uid).map(|c| c.uid))
                } else {
                    single(caster.equipped_uid)
                }
            }
            _ => Vec::new(),
        }
    }

    fn card_targets(&mut self, ctx: &EffectContext) -> Vec<CardUid> {
        let Some(caster) = self.game.card(ctx.caster) else {
            return Vec::new();
        };
        let ability = &ctx.ability;
        let candidates: Vec<CardUid> = self
            .card_candidates(ability, caster)
            .into_iter()
            .filter(|uid| match self.game.card(*uid) {
                Some(target) if ability.target == AbilityTarget::CharacterSelf => {
                    ability.are_target_conditions_met(&self.game, &self.catalog, caster, TargetRef::Card(target))
                }
                Some(target) => ability.can_target(&self.game, &self.catalog, caster, TargetRef::Card(target)),
                None => false,
            })
            .collect();
        match ability.filter_target {
            Some(filter) if !candidates.is_empty() => filter.apply(candidates, &mut self.rng),
            _ => candidates,
        }
    }

    fn slot_targets(&mut self, ctx: &EffectContext) -> Vec<Slot> {
        if ctx.ability.target != AbilityTarget::AllSlots {
            return Vec::new();
        }
        let Some(caster) = self.game.card(ctx.caster) else {
            return Vec::new();
        };
        let candidates: Vec<Slot> = Slot::all(self.game.players.len())
            .into_iter()
            .filter(|slot| {
                ctx.ability
                    .can_target(&self.game, &self.catalog, caster, TargetRef::Slot(*slot))
            })
            .collect();
        match ctx.ability.filter_target {
            Some(filter) if !candidates.is_empty() => filter.apply(candidates, &mut self.rng),
            _ => candidates,
        }
    }

    fn card_data_targets(&mut self, ctx: &EffectContext) -> Vec<String> {
        if ctx.ability.target != AbilityTarget::AllCardData {
            return Vec::new();
        }
        let Some(caster) = self.game.card(ctx.caster) else {
            return Vec::new();
        };
        let candidates: Vec<String> = self
            .catalog
            .cards()
            .filter(|def| {
                ctx.ability
                    .are_target_conditions_met(&self.game, &self.catalog, caster, TargetRef::CardData(def))
            })
            .map(|def| def.id.clone())
            .collect();
        match ctx.ability.filter_target {
            Some(filter) if !candidates.is_empty() => filter.apply(candidates, &mut self.rng),
            _ => candidates,
        }
    }

    fn resolve_players(&mut self, ctx: &EffectContext) {
        for target in self.player_targets(ctx) {
            self.resolve_effect_player(ctx, target);
        }
    }

    fn resolve_cards(&mut self, ctx: &EffectContext) {
        for target in self.card_targets(ctx) {
            self.resolve_effect_card(ctx, target);
        }
    }

    fn resolve_slots(&mut self, ctx: &EffectContext) {
        for target in self.slot_targets(ctx) {
            self.resolve_effect_slot(ctx, target);
        }
    }

    fn resolve_card_data(&mut self, ctx: &EffectContext) {
        for target in self.card_data_targets(ctx) {
            for effect in &ctx.ability.effects {
                effect.apply_card_data(self, ctx, &target);
            }
        }
    }

    fn resolve_effect_player(&mut self, ctx: &EffectContext, target: PlayerId) {
        for effect in &ctx.ability.effects {
            effect.apply_player(self, ctx, target);
        }
        self.emit(GameEvent::AbilityTargetPlayer {
            ability_id: ctx.ability.id.clone(),
            caster: ctx.caster,
            target,
        });
    }

    fn resolve_effect_card(&mut self, ctx: &EffectContext, target: CardUid) {
        for effect in &ctx.ability.effects {
            effect.apply_card(self, ctx, target);
        }
        self.emit(GameEvent::AbilityTargetCard {
            ability_id: ctx.ability.id.clone(),
            caster: ctx.caster,
            target,
        });
        self.game.last_targeted = Some(target);
    }

    fn resolve_effect_slot(&mut self, ctx: &EffectContext, target: Slot) {
        for effect in &ctx.ability.effects {
            effect.apply_slot(self, ctx, target);
        }
        self.emit(GameEvent::AbilityTargetSlot {
            ability_id: ctx.ability.id.clone(),
            caster: ctx.caster,
            slot: target,
        });
    }

    /// 记账、支付消耗、重算持续效果、判定胜负，然后把连锁能力入队。
    pub(crate) fn after_ability_resolved(&mut self, ability: &AbilityDef, caster: CardUid) {
        self.game.abilities_played.insert(ability.id.clone());
        let owner = self.game.card(caster).map(|card| card.player_id);

        if ability.charge_player_action {
            if let Some(player) = owner.and_then(|id| self.game.get_player_mut(id)) {
                player.use_action(!ability.half_action);
            }
        } else if matches!(ability.trigger, AbilityTrigger::Activate | AbilityTrigger::None) {
            if let Some(card) = self.game.card_mut(caster) {
                match ability.ability_type {
                    AbilityType::Spell => card.base.mp -= ability.mana_cost,
                    AbilityType::Skill => card.damage += ability.mana_cost,
                }
                if !ability.free_action {
                    card.reduce_action_value();
                }
            }
        }
        if ability.exhaust {
            if let Some(card) = self.game.card_mut(caster) {
                card.exhausted = true;
            }
        }

        self.update_ongoing();
        self.check_for_winner();

        if ability.target != AbilityTarget::ChoiceSelector && !self.game.has_ended() {
            for chain_id in &ability.chain_abilities {
                if let Some(chain) = self.catalog.ability(chain_id) {
                    self.trigger_card_ability(&chain, caster, None);
                }
            }
        }

        self.emit(GameEvent::AbilityEnded {
            ability_id: ability.id.clone(),
            caster,
        });
        self.resolve_all_after(self.settings.delays.ability());
    }

    // ---- 选择器回复 ----

    fn selector_parts(&self, player_id: PlayerId) -> Result<(SelectorContext, Arc<AbilityDef>), RuleError> {
        self.rules().ensure_selector_turn(player_id)?;
        let ctx = self.game.selector.context().cloned().ok_or(RuleError::NoSelection)?;
        if self.game.card(ctx.caster_uid).is_none() {
            return Err(RuleError::CardNotFound { uid: ctx.caster_uid });
        }
        let ability = self
            .catalog
            .ability(&ctx.ability_id)
            .ok_or_else(|| RuleError::AbilityNotFound {
                ability_id: ctx.ability_id.clone(),
            })?;
        Ok((ctx, ability))
    }

    fn record_selection(&mut self, ctx: &SelectorContext) {
        let Some(card_id) = self.game.card(ctx.caster_uid).map(|card| card.card_id.clone()) else {
            return;
        };
        if let Some(player) = self.game.get_player_mut(ctx.player_id) {
            player.history.push(HistoryEntry::CastAbility {
                card_id,
                uid: ctx.caster_uid,
                ability_id: ctx.ability_id.clone(),
            });
        }
    }

    pub fn select_card(&mut self, player_id: PlayerId, target: CardUid) -> Result<(), RuleError> {
        let (ctx, ability) = self.selector_parts(player_id)?;
        let caster = self
            .game
            .card(ctx.caster_uid)
            .ok_or(RuleError::CardNotFound { uid: ctx.caster_uid })?;
        let chosen = self.game.card(target).ok_or(RuleError::CardNotFound { uid: target })?;

        let valid = match self.game.selector {
            Selector::SelectTarget(_) => ability.can_target(&self.game, &self.catalog, caster, TargetRef::Card(chosen)),
            Selector::SelectorCard(_) => self.rules().is_card_selection_valid(caster, &ability, chosen),
            _ => false,
        };
        if !valid {
            return Err(RuleError::InvalidTarget);
        }
        if matches!(self.game.selector, Selector::SelectTarget(_)) {
            self.record_selection(&ctx);
        }

        self.game.selector = Selector::None;
        let effect_ctx = EffectContext {
            ability: Arc::clone(&ability),
            caster: ctx.caster_uid,
            triggerer: self.game.ability_triggerer,
        };
        self.resolve_effect_card(&effect_ctx, target);
        self.after_ability_resolved(&ability, ctx.caster_uid);
        self.resolve_all();
        Ok(())
    }

    pub fn select_player(&mut self, player_id: PlayerId, target: PlayerId) -> Result<(), RuleError> {
        let (ctx, ability) = self.selector_parts(player_id)?;
        if !matches!(self.game.selector, Selector::SelectTarget(_)) {
            return Err(RuleError::InvalidTarget);
        }
        let caster = self
            .game
            .card(ctx.caster_uid)
            .ok_or(RuleError::CardNotFound { uid: ctx.caster_uid })?;
        let chosen = self
            .game
            .get_player(target)
            .ok_or(RuleError::PlayerNotFound { player_id: target })?;
        if !ability.can_target(&self.game, &self.catalog, caster, TargetRef::Player(chosen)) {
            return Err(RuleError::InvalidTarget);
        }

        self.record_selection(&ctx);
        self.game.selector = Selector::None;
        let effect_ctx = EffectContext {
            ability: Arc::clone(&ability),
            caster: ctx.caster_uid,
            triggerer: self.game.ability_triggerer,
        };
        self.resolve_effect_player(&effect_ctx, target);
        self.after_ability_resolved(&ability, ctx.caster_uid);
        self.resolve_all();
        Ok(())
    }

    pub fn select_slot(&mut self, player_id: PlayerId, target: Slot) -> Result<(), RuleError> {
        let (ctx, ability) = self.selector_parts(player_id)?;
        if !matches!(self.game.selector, Selector::SelectTarget(_)) || !target.is_valid() {
            return Err(RuleError::InvalidTarget);
        }
        let caster = self
            .game
            .card(ctx.caster_uid)
            .ok_or(RuleError::CardNotFound { uid: ctx.caster_uid })?;
        if !ability.can_target(&self.game, &self.catalog, caster, TargetRef::Slot(target)) {
            return Err(RuleError::InvalidTarget);
        }

        self.record_selection(&ctx);
        self.game.selector = Selector::None;
        let effect_ctx = EffectContext {
            ability: Arc::clone(&ability),
            caster: ctx.caster_uid,
            triggerer: self.game.ability_triggerer,
        };
        self.resolve_effect_slot(&effect_ctx, target);
        self.after_ability_resolved(&ability, ctx.caster_uid);
        self.resolve_all();
        Ok(())
    }

    /// 选项菜单：被选中的连锁能力直接结算，不再经过触发条件。
    pub fn select_choice(&mut self, player_id: PlayerId, choice: usize) -> Result<(), RuleError> {
        let (ctx, ability) = self.selector_parts(player_id)?;
        if !matches!(self.game.selector, Selector::SelectorChoice(_)) || ability.target != AbilityTarget::ChoiceSelector {
            return Err(RuleError::InvalidTarget);
        }
        let chosen_id = ability.chain_abilities.get(choice).ok_or(RuleError::InvalidTarget)?;
        let chosen = self
            .catalog
            .ability(chosen_id)
            .ok_or_else(|| RuleError::AbilityNotFound {
                ability_id: chosen_id.clone(),
            })?;
        let caster = self
            .game
            .card(ctx.caster_uid)
            .ok_or(RuleError::CardNotFound { uid: ctx.caster_uid })?;
        self.rules().check_select_ability(caster, &chosen)?;

        self.game.selector = Selector::None;
        self.after_ability_resolved(&ability, ctx.caster_uid);
        self.resolve_card_ability(chosen, ctx.caster_uid, Some(ctx.caster_uid));
        self.resolve_all();
        Ok(())
    }

    /// 放弃当前选择；已入队的后续结算继续执行。
    pub fn cancel_selection(&mut self, player_id: PlayerId) -> Result<(), RuleError> {
        self.rules().ensure_selector_turn(player_id)?;
        self.clear_selection();
        self.resolve_all();
        Ok(())
    }

    pub(crate) fn clear_selection(&mut self) {
        if !self.game.selector.is_none() {
            self.game.selector = Selector::None;
            self.emit(GameEvent::SelectorCancelled);
        }
    }

    // ---- 持续效果 ----

    fn ongoing_targets(&self, ability: &AbilityDef, caster: &Card, owner: PlayerId) -> Vec<OngoingTarget> {
        let game = &self.game;
        let catalog = &self.catalog;
        let card_ok = |target: &Card| ability.are_target_conditions_met(game, catalog, caster, TargetRef::Card(target));
        let mut targets = Vec::new();

        match ability.target {
            AbilityTarget::CharacterSelf => {
                if card_ok(caster) {
                    targets.push(OngoingTarget::Card(caster.uid));
                }
            }
            AbilityTarget::PlayerSelf | AbilityTarget::AllPlayers | AbilityTarget::PlayerOpponent => {
                for player in game.players.iter() {
                    let included = match ability.target {
                        AbilityTarget::PlayerSelf => player.player_id == owner,
                        AbilityTarget::PlayerOpponent => player.player_id != owner,
                        _ => true,
                    };
                    if included && ability.are_target_conditions_met(game, catalog, caster, TargetRef::Player(player)) {
                        targets.push(OngoingTarget::Player(player.player_id));
                    }
                }
            }
            AbilityTarget::EquippedCard => {
                let is_equipment = caster.def(catalog).map(|d| d.is_equipment()).unwrap_or(false);
                let partner = if is_equipment {
                    game.bearer_of(caster.uid)
                } else {
                    game.equipped_card(caster)
                };
                if let Some(target) = partner.filter(|target| card_ok(target)) {
                    targets.push(OngoingTarget::Card(target.uid));
                }
            }
            AbilityTarget::AllCardsAllPiles | AbilityTarget::AllCardsHand | AbilityTarget::AllCardsBoard => {
                let hand = matches!(ability.target, AbilityTarget::AllCardsAllPiles | AbilityTarget::AllCardsHand);
                let board = matches!(ability.target, AbilityTarget::AllCardsAllPiles | AbilityTarget::AllCardsBoard);
                let equip = ability.target == AbilityTarget::AllCardsAllPiles;
                for player in game.players.iter() {
                    let zones = [
                        (hand, &player.cards_hand),
                        (board, &player.cards_board),
                        (equip, &player.cards_equip),
                    ];
                    for (_, cards) in zones.iter().filter(|(included, _)| *included) {
                        targets.extend(cards.iter().filter(|c| card_ok(c)).map(|c| OngoingTarget::Card(c.uid)));
                    }
                }
            }
            _ => {}
        }
        targets
    }

    fn update_ongoing_abilities(&mut self, caster_uid: CardUid) {
        let Some(caster) = self.game.card(caster_uid) else {
            return;
        };
        if !caster.can_do_abilities() {
            return;
        }
        let owner = caster.player_id;
        let abilities = self.abilities_with_trigger(caster, AbilityTrigger::Ongoing);

        for ability in abilities {
            let Some(caster) = self.game.card(caster_uid) else {
                return;
            };
            if !ability.are_trigger_conditions_met(&self.game, &self.catalog, caster, TargetRef::Card(caster)) {
                continue;
            }
            for target in self.ongoing_targets(&ability, caster, owner) {
                for effect in &ability.effects {
                    match target {
                        OngoingTarget::Card(uid) => {
                            if let Some(card) = self.game.card_mut(uid) {
                                effect.apply_ongoing_card(card);
                            }
                        }
                        OngoingTarget::Player(id) => {
                            if let Some(player) = self.game.get_player_mut(id) {
                                effect.apply_ongoing_player(player);
                            }
                        }
                    }
                }
            }
        }
    }

    /// 全量重算：清空所有 ongoing 累加值，再按当前局面重新应用。连续调用两次结果不变。
    pub fn update_ongoing(&mut self) {
        for player in self.game.players.iter_mut() {
            player.clear_ongoing();
            for card in player
                .hero
                .iter_mut()
                .chain(player.cards_board.iter_mut())
                .chain(player.cards_equip.iter_mut())
                .chain(player.cards_hand.iter_mut())
            {
                card.clear_ongoing();
            }
        }

        let casters: Vec<CardUid> = self
            .game
            .players
            .iter()
            .flat_map(|p| {
                p.hero
                    .iter()
                    .chain(p.cards_board.iter())
                    .chain(p.cards_equip.iter())
            })
            .map(|card| card.uid)
            .collect();
        for caster in casters {
            self.update_ongoing_abilities(caster);
        }

        for player in self.game.players.iter_mut() {
            let guardians = player
                .cards_board
                .iter()
                .any(|card| card.has_status(StatusType::Protection) && !card.has_status(StatusType::Stealth));
            if guardians {
                player.add_ongoing_status(StatusType::Protected, 0);
                for card in player.cards_board.iter_mut() {
                    if !card.has_status(StatusType::Protection) && !card.has_status(StatusType::Protected) {
                        card.add_ongoing_status(StatusType::Protected, 0);
                    }
                }
            }
            for card in player.cards_board.iter_mut().chain(player.cards_hand.iter_mut()) {
                add_status_bonuses(card);
            }
        }

        let mut doomed = Vec::new();
        for player in self.game.players.iter() {
            doomed.extend(player.cards_board.iter().rev().filter(|c| c.hp() <= 0).map(|c| c.uid));
            for equip in player.cards_equip.iter().rev() {
                let broken = equip.damage > 0 && equip.hp() <= 0;
                let orphaned = self.game.bearer_of(equip.uid).is_none();
                if broken || orphaned {
                    doomed.push(equip.uid);
                }
            }
        }
        for uid in doomed {
            self.discard_card(uid);
        }

        for uid in std::mem::take(&mut self.cards_to_clear) {
            let Some(def) = self.game.card(uid).and_then(|card| card.def(&self.catalog)) else {
                continue;
            };
            if let Some(card) = self.game.card_mut(uid) {
                card.reset(&def);
            }
        }
    }
}

fn add_status_bonuses(card: &mut Card) {
    let bonuses: Vec<(StatusType, i32)> = card
        .status
        .iter()
        .chain(card.ongoing_status.iter())
        .map(|s| (s.status_type, s.value))
        .collect();
    for (status, value) in bonuses {
        match status {
            StatusType::AddAttack => card.ongoing.attack += value,
            StatusType::AddDefense => card.ongoing.defense += value,
            StatusType::AddHp => card.ongoing.hp += value,
            StatusType::AddManaCost => card.ongoing.mana += value,
            StatusType::AddAgility => card.ongoing.agility += value,
            _ => {}
        }
    }
}
